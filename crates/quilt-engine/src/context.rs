//! Contexts: a workspace seen through a set of unlocked pointers
//!
//! A context has no identity beyond its rendered string - that string is the
//! automation cache key, so everything here must be a deterministic function
//! of the workspace, the unlocked set, and the store's current resolution
//! state. Pointer IDs are assigned in a fixed pre-order over the display
//! fields; rendering expands unlocked pointers in place and shows locked
//! ones as bare IDs.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use quilt_core::{Address, Datastore, PointerId, PointerMap, Result, WorkspaceNode};

use crate::workspace;

/// A presented view: one workspace plus the addresses whose content is
/// visible in it. The workspace address itself is always a member of the
/// unlocked set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    workspace: Address,
    unlocked: BTreeSet<Address>,
}

impl Context {
    pub fn new(workspace: Address, mut unlocked: BTreeSet<Address>) -> Self {
        unlocked.insert(workspace);
        Self { workspace, unlocked }
    }

    /// A fresh context over `workspace` with the default visibility:
    /// question, scratchpad, and sub-questions unlocked; everything else
    /// locked.
    pub fn with_default_unlocks(db: &Datastore, address: Address) -> Result<Self> {
        let node = workspace::node_at(db, address)?;
        Ok(Self::new(address, workspace::default_unlocked(address, &node)))
    }

    pub fn workspace(&self) -> Address {
        self.workspace
    }

    pub fn is_unlocked(&self, addr: Address) -> bool {
        self.unlocked.contains(&addr)
    }

    pub fn node(&self, db: &Datastore) -> Result<WorkspaceNode> {
        workspace::node_at(db, self.workspace)
    }

    /// The successor context after unlocking `addr` in place.
    pub fn unlock(&self, addr: Address) -> Self {
        let mut unlocked = self.unlocked.clone();
        unlocked.insert(addr);
        Self {
            workspace: self.workspace,
            unlocked,
        }
    }

    /// The unlocked set for a successor *workspace*: everything visible now
    /// stays visible (structural addresses are shared between the two
    /// workspaces), the old workspace root drops out so it renders as a
    /// locked predecessor, and `additions` become visible.
    pub fn successor_unlocks(
        &self,
        successor: Address,
        additions: &[Address],
    ) -> BTreeSet<Address> {
        let mut unlocked = self.unlocked.clone();
        unlocked.remove(&self.workspace);
        unlocked.insert(successor);
        unlocked.extend(additions.iter().copied());
        unlocked
    }

    /// Assign pointer IDs for this view. Structural fields take their
    /// reserved tags first (sub-entries, then scratchpad, then predecessor);
    /// every other address visible through an unlocked page is numbered on
    /// first encounter in pre-order.
    pub fn pointer_names(
        &self,
        db: &Datastore,
    ) -> Result<(HashMap<Address, PointerId>, PointerMap)> {
        let node = self.node(db)?;
        let mut names: HashMap<Address, PointerId> = HashMap::new();
        let mut pointers = PointerMap::new();

        fn assign(
            names: &mut HashMap<Address, PointerId>,
            pointers: &mut PointerMap,
            addr: Address,
            id: PointerId,
        ) {
            if let std::collections::hash_map::Entry::Vacant(entry) = names.entry(addr) {
                entry.insert(id);
                pointers.insert(id, addr);
            }
        }

        for (i, sub) in node.subentries.iter().enumerate() {
            let i = i as u32 + 1;
            assign(&mut names, &mut pointers, sub.question, PointerId::SubQuestion(i));
            assign(&mut names, &mut pointers, sub.answer, PointerId::SubAnswer(i));
            assign(&mut names, &mut pointers, sub.workspace, PointerId::SubWorkspace(i));
        }
        assign(&mut names, &mut pointers, node.scratchpad, PointerId::Scratchpad);
        if let Some(pred) = node.predecessor {
            assign(&mut names, &mut pointers, pred, PointerId::Predecessor);
        }

        let mut counter = 0u32;
        let mut visited = HashSet::new();
        for field in self.display_fields(&node) {
            self.number_links(db, field, &mut names, &mut pointers, &mut counter, &mut visited)?;
        }
        Ok((names, pointers))
    }

    /// The structural fields in display order. Pointer numbering and
    /// rendering both traverse this order, which is what makes renderings
    /// deterministic.
    fn display_fields(&self, node: &WorkspaceNode) -> Vec<Address> {
        let mut fields = vec![node.question, node.scratchpad];
        for sub in &node.subentries {
            fields.extend([sub.question, sub.answer, sub.workspace]);
        }
        fields.extend(node.predecessor);
        fields
    }

    fn number_links(
        &self,
        db: &Datastore,
        addr: Address,
        names: &mut HashMap<Address, PointerId>,
        pointers: &mut PointerMap,
        counter: &mut u32,
        visited: &mut HashSet<Address>,
    ) -> Result<()> {
        if !self.is_unlocked(addr) || !visited.insert(addr) {
            return Ok(());
        }
        let Some(content) = db.lookup(addr)? else {
            return Ok(());
        };
        for link in content.links() {
            if !names.contains_key(&link) {
                *counter += 1;
                names.insert(link, PointerId::Data(*counter));
                pointers.insert(PointerId::Data(*counter), link);
            }
            self.number_links(db, link, names, pointers, counter, visited)?;
        }
        Ok(())
    }

    /// The canonical presentation of this context. This string is the
    /// automation identity: two contexts that render equally are the same
    /// context as far as the cache is concerned.
    pub fn rendering(&self, db: &Datastore) -> Result<String> {
        let node = self.node(db)?;
        let (names, _) = self.pointer_names(db)?;

        let mut texts: HashMap<Address, String> = HashMap::new();
        for field in self.display_fields(&node) {
            self.render_embedded(db, field, &names, &mut texts)?;
        }

        let mut out = String::new();
        out.push_str(&format!(
            "Question: {}\n",
            self.inline_text(db, node.question, &names, &texts)?
        ));
        out.push_str(&format!(
            "Scratchpad: {}\n",
            self.inline_text(db, node.scratchpad, &names, &texts)?
        ));
        for (i, sub) in node.subentries.iter().enumerate() {
            out.push_str(&format!(
                "Sub {}. Q: {}\n       A: {}   W: {}\n",
                i + 1,
                self.inline_text(db, sub.question, &names, &texts)?,
                lookup_text(&texts, sub.answer),
                lookup_text(&texts, sub.workspace),
            ));
        }
        if let Some(pred) = node.predecessor {
            out.push_str(&format!("Predecessor: {}\n", lookup_text(&texts, pred)));
        }
        Ok(out)
    }

    /// Render `addr` as it appears embedded in other content: its pointer ID
    /// when locked, `[$id: content]` when unlocked. Children render before
    /// parents; shared children render once.
    fn render_embedded(
        &self,
        db: &Datastore,
        addr: Address,
        names: &HashMap<Address, PointerId>,
        texts: &mut HashMap<Address, String>,
    ) -> Result<()> {
        if texts.contains_key(&addr) {
            return Ok(());
        }
        let locked_form = names
            .get(&addr)
            .map(|id| id.to_string())
            .unwrap_or_else(|| addr.to_string());
        if !self.is_unlocked(addr) {
            texts.insert(addr, locked_form);
            return Ok(());
        }
        let Some(content) = db.lookup(addr)?.cloned() else {
            texts.insert(addr, locked_form);
            return Ok(());
        };
        for link in content.links() {
            self.render_embedded(db, link, names, texts)?;
        }
        let inner = content.to_text(&|a| lookup_text(texts, a));
        let wrapped = match names.get(&addr) {
            Some(id) => format!("[{}: {}]", id, inner),
            None => format!("[{}]", inner),
        };
        texts.insert(addr, wrapped);
        Ok(())
    }

    /// Render a structural field inline: bare content when unlocked, its
    /// pointer ID otherwise.
    fn inline_text(
        &self,
        db: &Datastore,
        addr: Address,
        names: &HashMap<Address, PointerId>,
        texts: &HashMap<Address, String>,
    ) -> Result<String> {
        if self.is_unlocked(addr) {
            if let Some(content) = db.lookup(addr)? {
                return Ok(content.to_text(&|a| lookup_text(texts, a)));
            }
        }
        Ok(names
            .get(&addr)
            .map(|id| id.to_string())
            .unwrap_or_else(|| addr.to_string()))
    }
}

fn lookup_text(texts: &HashMap<Address, String>, addr: Address) -> String {
    texts
        .get(&addr)
        .cloned()
        .unwrap_or_else(|| addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::{new_child, new_root};
    use quilt_core::{insert_hypertext, PointerMap as Pointers};

    fn setup(question: &str) -> (Datastore, Context) {
        let mut db = Datastore::new();
        let q = insert_hypertext(&mut db, question, &Pointers::new()).unwrap();
        let root = new_root(&mut db, q).unwrap();
        let ctx = Context::with_default_unlocks(&db, root.address).unwrap();
        (db, ctx)
    }

    #[test]
    fn test_root_rendering_shape() {
        let (db, ctx) = setup("what is 1+1?");
        let rendering = ctx.rendering(&db).unwrap();
        assert_eq!(rendering, "Question: what is 1+1?\nScratchpad: \n");
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let (db, ctx) = setup("stable?");
        assert_eq!(ctx.rendering(&db).unwrap(), ctx.rendering(&db).unwrap());
    }

    #[test]
    fn test_inline_children_render_as_numbered_pointers() {
        let mut db = Datastore::new();
        let q = insert_hypertext(&mut db, "is [[a] [b]] sorted?", &Pointers::new()).unwrap();
        let root = new_root(&mut db, q).unwrap();
        let ctx = Context::with_default_unlocks(&db, root.address).unwrap();

        let rendering = ctx.rendering(&db).unwrap();
        // The question's embedded child is visible but locked.
        assert_eq!(rendering, "Question: is $1 sorted?\nScratchpad: \n");
    }

    #[test]
    fn test_unlocking_expands_one_level() {
        let mut db = Datastore::new();
        let q = insert_hypertext(&mut db, "is [[a] [b]] sorted?", &Pointers::new()).unwrap();
        let root = new_root(&mut db, q).unwrap();
        let ctx = Context::with_default_unlocks(&db, root.address).unwrap();

        let (_, pointers) = ctx.pointer_names(&db).unwrap();
        let child = pointers[&PointerId::Data(1)];
        let unlocked = ctx.unlock(child);

        let rendering = unlocked.rendering(&db).unwrap();
        // One level deep: the child expands, its own children stay locked.
        assert_eq!(
            rendering,
            "Question: is [$1: $2 $3] sorted?\nScratchpad: \n"
        );
    }

    #[test]
    fn test_child_context_shows_locked_predecessor() {
        let mut db = Datastore::new();
        let q = insert_hypertext(&mut db, "root?", &Pointers::new()).unwrap();
        let root = new_root(&mut db, q).unwrap();
        let sub_q = insert_hypertext(&mut db, "sub?", &Pointers::new()).unwrap();
        let child = new_child(&mut db, sub_q, root.address).unwrap();

        let ctx = Context::with_default_unlocks(&db, child.address).unwrap();
        let rendering = ctx.rendering(&db).unwrap();
        assert_eq!(
            rendering,
            "Question: sub?\nScratchpad: \nPredecessor: $p\n"
        );
    }

    #[test]
    fn test_identical_views_render_identically() {
        let mut db = Datastore::new();
        let q = insert_hypertext(&mut db, "same?", &Pointers::new()).unwrap();
        let root = new_root(&mut db, q).unwrap();
        let a = Context::with_default_unlocks(&db, root.address).unwrap();
        let b = Context::with_default_unlocks(&db, root.address).unwrap();
        assert_eq!(a.rendering(&db).unwrap(), b.rendering(&db).unwrap());
    }
}
