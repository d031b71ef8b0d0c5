//! The content-addressed, promise-capable datastore
//!
//! Every slot is exactly one of `Filled`, `Pending`, or `Alias`. Interning is
//! by canonical printed form: each embedded address renders as its resolved
//! canonical address, children first, so equal content always lands on one
//! address. A promise fulfilled with content the store already holds becomes
//! an alias of the canonical copy, and its waiters travel with it.
//!
//! The canonical-form index is keyed by *current* resolution: when a pending
//! address embedded in filled content later becomes an alias, every filled
//! slot containing it is re-keyed under its recomputed form. Re-keying never
//! cascades - a slot's own address does not change, so the keys of its own
//! parents are unaffected.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::address::Address;
use crate::error::{QuiltError, Result};
use crate::hypertext::Hypertext;

/// Wake-up token bound to a parked context.
///
/// Opaque to the datastore; the scheduler maps tokens back to contexts and
/// sessions. Delivery happens when the transitively-resolved slot a token
/// waits on becomes filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WakeToken(pub u64);

/// State of one datastore slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Slot {
    /// Concrete hypertext.
    Filled(Hypertext),
    /// A promise, with the wake tokens registered against it.
    Pending(Vec<WakeToken>),
    /// Canonicalised to another address. Only `Pending` slots ever
    /// transition here, and the target is always a filled slot at the time
    /// of the transition, so chains are a single hop.
    Alias(Address),
}

/// The shared store of all hypertext, promises, and aliases.
#[derive(Debug, Default)]
pub struct Datastore {
    slots: Vec<Slot>,
    /// Canonical form -> canonical filled address.
    index: HashMap<String, Address>,
    /// Filled address -> the key it is currently indexed (or last keyed)
    /// under.
    keys: HashMap<Address, String>,
    /// Pending address -> filled addresses whose canonical form embeds it.
    /// Consulted when the pending address becomes an alias.
    dependents: HashMap<Address, Vec<Address>>,
}

impl Datastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot's slot arena. The index, key, and
    /// dependent maps are derived data and are reconstructed here.
    pub fn from_slots(slots: Vec<Slot>) -> Result<Self> {
        let mut db = Self {
            slots,
            index: HashMap::new(),
            keys: HashMap::new(),
            dependents: HashMap::new(),
        };
        for i in 0..db.slots.len() {
            let addr = Address::new(i as u64);
            if let Slot::Filled(content) = &db.slots[i] {
                let content = content.clone();
                let key = db.canonical_form(&content)?;
                if db.index.contains_key(&key) {
                    // Displaced duplicate (a pre-snapshot re-key collision).
                    db.keys.insert(addr, key);
                } else {
                    db.index.insert(key.clone(), addr);
                    db.keys.insert(addr, key);
                }
                db.register_dependents(addr)?;
            }
        }
        Ok(db)
    }

    /// The raw slot arena, for snapshotting.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn push(&mut self, slot: Slot) -> Address {
        let addr = Address::new(self.slots.len() as u64);
        self.slots.push(slot);
        addr
    }

    fn slot(&self, addr: Address) -> Result<&Slot> {
        self.slots
            .get(addr.index())
            .ok_or_else(|| QuiltError::UnknownAddress(addr.to_string()))
    }

    /// Follow aliases to a non-alias slot.
    pub fn resolve(&self, addr: Address) -> Result<Address> {
        let mut current = addr;
        for _ in 0..=self.slots.len() {
            match self.slot(current)? {
                Slot::Alias(next) => current = *next,
                _ => return Ok(current),
            }
        }
        Err(QuiltError::AliasCycle(addr.to_string()))
    }

    /// The hypertext behind `addr`, or `None` while it is pending.
    pub fn lookup(&self, addr: Address) -> Result<Option<&Hypertext>> {
        let canonical = self.resolve(addr)?;
        match self.slot(canonical)? {
            Slot::Filled(content) => Ok(Some(content)),
            _ => Ok(None),
        }
    }

    /// The hypertext behind `addr`; pending content is a fatal error here.
    pub fn deref(&self, addr: Address) -> Result<&Hypertext> {
        self.lookup(addr)?
            .ok_or_else(|| QuiltError::PendingContent(addr.to_string()))
    }

    pub fn is_fulfilled(&self, addr: Address) -> Result<bool> {
        Ok(self.lookup(addr)?.is_some())
    }

    /// The canonical printed form of `content` under the store's current
    /// resolution state: every embedded address renders as its resolved
    /// canonical address.
    pub fn canonical_form(&self, content: &Hypertext) -> Result<String> {
        let mut display = HashMap::new();
        for link in content.links() {
            let canonical = self.resolve(link)?;
            display.insert(link, canonical.to_string());
        }
        Ok(content.to_text(&|addr| {
            display
                .get(&addr)
                .cloned()
                .unwrap_or_else(|| addr.to_string())
        }))
    }

    /// Intern `content` by canonical form. Children must already be stored;
    /// interning proceeds bottom-up.
    pub fn insert(&mut self, content: Hypertext) -> Result<Address> {
        let key = self.canonical_form(&content)?;
        if let Some(&addr) = self.index.get(&key) {
            return Ok(addr);
        }
        let addr = self.push(Slot::Filled(content));
        self.index.insert(key.clone(), addr);
        self.keys.insert(addr, key);
        self.register_dependents(addr)?;
        Ok(addr)
    }

    /// Allocate a fresh promise. Promises are not content-indexed.
    pub fn make_promise(&mut self) -> Address {
        self.push(Slot::Pending(Vec::new()))
    }

    /// Fulfil the promise at `addr` with `content`.
    ///
    /// If the canonical form is already filled elsewhere, `addr` becomes an
    /// alias of the canonical copy and its waiters are dispatched: delivered
    /// if the target is filled, merged into the target's waiter set
    /// otherwise. Returns the tokens delivered in this step.
    pub fn fulfil(&mut self, addr: Address, content: Hypertext) -> Result<Vec<WakeToken>> {
        let key = self.canonical_form(&content)?;
        let waiters = match self.slots.get_mut(addr.index()) {
            Some(Slot::Pending(w)) => std::mem::take(w),
            Some(_) => return Err(QuiltError::DoubleFulfil(addr.to_string())),
            None => return Err(QuiltError::UnknownAddress(addr.to_string())),
        };
        match self.index.get(&key).copied() {
            Some(canonical) if canonical != addr => {
                debug!(%addr, %canonical, "promise fulfilled with known content; aliasing");
                self.slots[addr.index()] = Slot::Alias(canonical);
                self.rekey_dependents(addr)?;
                let target = self.resolve(canonical)?;
                match self.slots.get_mut(target.index()) {
                    Some(Slot::Filled(_)) => Ok(waiters),
                    Some(Slot::Pending(w)) => {
                        w.extend(waiters);
                        Ok(Vec::new())
                    }
                    _ => Err(QuiltError::AliasCycle(target.to_string())),
                }
            }
            _ => {
                self.slots[addr.index()] = Slot::Filled(content);
                self.index.insert(key.clone(), addr);
                self.keys.insert(addr, key);
                self.register_dependents(addr)?;
                // A filled slot can never alias; its dependents are settled.
                self.dependents.remove(&addr);
                Ok(waiters)
            }
        }
    }

    /// Register `token` against `addr`. Returns `true` if the token was
    /// parked on a pending slot, `false` if the resolved slot is already
    /// filled (the caller delivers immediately).
    pub fn register_waiter(&mut self, addr: Address, token: WakeToken) -> Result<bool> {
        let target = self.resolve(addr)?;
        match self.slots.get_mut(target.index()) {
            Some(Slot::Filled(_)) => Ok(false),
            Some(Slot::Pending(w)) => {
                w.push(token);
                Ok(true)
            }
            _ => Err(QuiltError::AliasCycle(target.to_string())),
        }
    }

    /// The tokens currently waiting on `addr`'s resolved slot.
    pub fn waiters(&self, addr: Address) -> Result<Vec<WakeToken>> {
        let target = self.resolve(addr)?;
        match self.slot(target)? {
            Slot::Pending(w) => Ok(w.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// Track which filled slots embed each still-pending address, so alias
    /// transitions can re-key them.
    fn register_dependents(&mut self, addr: Address) -> Result<()> {
        let links = match self.slot(addr)? {
            Slot::Filled(content) => content.links(),
            _ => return Ok(()),
        };
        for link in links {
            let target = self.resolve(link)?;
            if matches!(self.slot(target)?, Slot::Pending(_)) {
                let entry = self.dependents.entry(target).or_default();
                if !entry.contains(&addr) {
                    entry.push(addr);
                }
            }
        }
        Ok(())
    }

    /// Re-key every filled slot whose canonical form embedded `changed`,
    /// which has just become an alias. On a key collision the earlier
    /// address keeps the key; the displaced slot stays filled but leaves the
    /// index.
    fn rekey_dependents(&mut self, changed: Address) -> Result<()> {
        let Some(parents) = self.dependents.remove(&changed) else {
            return Ok(());
        };
        for parent in parents {
            let content = match self.slot(parent)? {
                Slot::Filled(content) => content.clone(),
                _ => continue,
            };
            let new_key = self.canonical_form(&content)?;
            if let Some(old_key) = self.keys.insert(parent, new_key.clone()) {
                if old_key == new_key {
                    continue;
                }
                if self.index.get(&old_key) == Some(&parent) {
                    self.index.remove(&old_key);
                }
            }
            match self.index.get(&new_key).copied() {
                Some(existing) if existing != parent => {
                    debug!(%parent, %existing, "re-keyed form collides; earlier address keeps the key");
                }
                _ => {
                    self.index.insert(new_key, parent);
                }
            }
            self.register_dependents(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hypertext::Chunk;

    fn raw(text: &str) -> Hypertext {
        Hypertext::Raw(vec![Chunk::Text(text.to_string())])
    }

    fn raw_with(text: &str, link: Address) -> Hypertext {
        Hypertext::Raw(vec![Chunk::Text(text.to_string()), Chunk::Link(link)])
    }

    #[test]
    fn test_interning_is_by_content() {
        let mut db = Datastore::new();
        let a = db.insert(raw("hello")).unwrap();
        let b = db.insert(raw("hello")).unwrap();
        let c = db.insert(raw("world")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_canonical_form_is_stable() {
        let mut db = Datastore::new();
        let child = db.insert(raw("x")).unwrap();
        let content = raw_with("see ", child);
        let once = db.canonical_form(&content).unwrap();
        let twice = db.canonical_form(&content).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fulfil_delivers_waiters() {
        let mut db = Datastore::new();
        let promise = db.make_promise();
        assert!(db.register_waiter(promise, WakeToken(1)).unwrap());
        assert!(db.register_waiter(promise, WakeToken(2)).unwrap());
        let delivered = db.fulfil(promise, raw("done")).unwrap();
        assert_eq!(delivered, vec![WakeToken(1), WakeToken(2)]);
        assert!(db.is_fulfilled(promise).unwrap());
    }

    #[test]
    fn test_fulfil_twice_is_fatal() {
        let mut db = Datastore::new();
        let promise = db.make_promise();
        db.fulfil(promise, raw("once")).unwrap();
        let err = db.fulfil(promise, raw("twice")).unwrap_err();
        assert!(matches!(err, QuiltError::DoubleFulfil(_)));
    }

    #[test]
    fn test_fulfil_with_known_content_aliases() {
        let mut db = Datastore::new();
        let original = db.insert(raw("same")).unwrap();
        let promise = db.make_promise();
        assert!(db.register_waiter(promise, WakeToken(7)).unwrap());

        let delivered = db.fulfil(promise, raw("same")).unwrap();
        // The target was already filled, so the waiter fires in this step.
        assert_eq!(delivered, vec![WakeToken(7)]);
        assert_eq!(db.resolve(promise).unwrap(), original);
        assert!(matches!(db.slot(promise).unwrap(), Slot::Alias(_)));
    }

    #[test]
    fn test_waiter_on_alias_resolves_through() {
        let mut db = Datastore::new();
        let original = db.insert(raw("known")).unwrap();
        let promise = db.make_promise();
        db.fulfil(promise, raw("known")).unwrap();
        // Registering against the alias lands on the filled target.
        assert!(!db.register_waiter(promise, WakeToken(3)).unwrap());
        assert_eq!(db.resolve(promise).unwrap(), original);
    }

    #[test]
    fn test_resolution_terminates() {
        let mut db = Datastore::new();
        let original = db.insert(raw("v")).unwrap();
        let p1 = db.make_promise();
        db.fulfil(p1, raw("v")).unwrap();
        let p2 = db.make_promise();
        db.fulfil(p2, raw("v")).unwrap();
        for addr in [original, p1, p2] {
            assert_eq!(db.resolve(addr).unwrap(), original);
        }
    }

    #[test]
    fn test_index_follows_post_hoc_aliasing() {
        let mut db = Datastore::new();
        // A parent interned while its child is still a promise.
        let child_promise = db.make_promise();
        let parent = db.insert(raw_with("wrap ", child_promise)).unwrap();

        // The promise later aliases to existing content.
        let existing = db.insert(raw("leaf")).unwrap();
        db.fulfil(child_promise, raw("leaf")).unwrap();
        assert_eq!(db.resolve(child_promise).unwrap(), existing);

        // New content built directly against the canonical child must now
        // intern onto the old parent.
        let rebuilt = db.insert(raw_with("wrap ", existing)).unwrap();
        assert_eq!(rebuilt, parent);
    }

    #[test]
    fn test_from_slots_rebuilds_index() {
        let mut db = Datastore::new();
        let a = db.insert(raw("alpha")).unwrap();
        let promise = db.make_promise();
        db.fulfil(promise, raw("alpha")).unwrap();

        let restored = Datastore::from_slots(db.slots().to_vec()).unwrap();
        assert_eq!(restored.resolve(promise).unwrap(), a);
        let again = {
            let mut r = restored;
            r.insert(raw("alpha")).unwrap()
        };
        assert_eq!(again, a);
    }
}
