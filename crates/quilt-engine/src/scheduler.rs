//! The memoising scheduler
//!
//! One scheduler owns the shared datastore, the automation cache, and the
//! park/wake bookkeeping for every session. Control flow is cooperative:
//! `next_step` either finishes the session, replays cached actions until a
//! context needs a human, or reports the session blocked; `act` applies the
//! driver's answer.
//!
//! Context selection is demand-driven, which is what the laziness guarantee
//! means in practice: the scheduler walks the root answer tree for the first
//! unfulfilled promise and presents only contexts that can advance it.
//! Sub-trees nobody observes are deferred indefinitely.
//!
//! Loop prevention: replayed renderings are recorded per session; a cached
//! action whose successors revisit a recorded rendering would replay
//! forever, so the scheduler breaks off and consults the driver instead.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use quilt_core::{
    build_hypertext, insert_hypertext, Address, Datastore, PointerId, PointerMap, QuiltError,
    Result, SubEntry, WakeToken, WorkspaceNode,
};

use crate::actions::Action;
use crate::context::Context;
use crate::session::{Session, SessionId};
use crate::workspace;

/// The process-wide rendering -> action memo.
///
/// Passed around explicitly, never module-level state. A rendering filled in
/// by one session is replayed by every other session sharing the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationCache {
    entries: HashMap<String, Action>,
}

impl AutomationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rendering: &str) -> Option<&Action> {
        self.entries.get(rendering)
    }

    pub fn remember(&mut self, rendering: String, action: Action) {
        self.entries.insert(rendering, action);
    }

    pub fn forget(&mut self, rendering: &str) {
        self.entries.remove(rendering);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A context waiting for a promise, keyed by its wake token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkedContext {
    pub session: SessionId,
    pub context: Context,
    pub awaiting: Address,
}

/// What the driver should do next for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Present this rendering and submit an action.
    Prompt { rendering: String },
    /// The root answer is complete; `answer` is its fully-expanded text.
    Done { answer: String },
    /// Every remaining context waits on a promise this session cannot
    /// advance; the outer driver may switch sessions.
    Blocked,
}

/// The engine: shared store, automation cache, parked contexts, sessions.
#[derive(Debug, Default)]
pub struct Scheduler {
    pub(crate) db: Datastore,
    pub(crate) automation: AutomationCache,
    pub(crate) parked: HashMap<WakeToken, ParkedContext>,
    pub(crate) next_token: u64,
    pub(crate) sessions: HashMap<SessionId, Session>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh scheduler sharing a previously recorded automation cache.
    pub fn with_automation(automation: AutomationCache) -> Self {
        Self {
            automation,
            ..Self::default()
        }
    }

    pub fn datastore(&self) -> &Datastore {
        &self.db
    }

    pub fn automation(&self) -> &AutomationCache {
        &self.automation
    }

    /// The promise address a session exists to fulfil.
    pub fn root_answer(&self, session: SessionId) -> Result<Address> {
        Ok(self.session(session)?.root_answer)
    }

    /// The workspace a session's root question was planted in.
    pub fn root_workspace(&self, session: SessionId) -> Result<Address> {
        Ok(self.session(session)?.root_workspace)
    }

    /// Plant a root question and enqueue its initial context.
    pub fn start_session(&mut self, question: &str) -> Result<SessionId> {
        let question = insert_hypertext(&mut self.db, question, &PointerMap::new())?;
        let root = workspace::new_root(&mut self.db, question)?;
        let context = Context::with_default_unlocks(&self.db, root.address)?;

        let id = SessionId::new();
        let mut session = Session::new(id, root.address, root.node.answer_promise);
        session.ready.push_back(context);
        self.sessions.insert(id, session);
        info!(session = %id, workspace = %root.address, "root question planted");
        Ok(id)
    }

    /// Advance the session as far as automation reaches, then report what
    /// the driver should do.
    pub fn next_step(&mut self, id: SessionId) -> Result<Step> {
        loop {
            // A context already awaiting an action (after a recoverable
            // error or a snapshot restore) is simply presented again.
            if let Some(current) = &self.session(id)?.current {
                let rendering = current.rendering(&self.db)?;
                return Ok(Step::Prompt { rendering });
            }

            let root_answer = self.session(id)?.root_answer;
            let Some(target) = self.choose_promise(root_answer, &mut HashSet::new())? else {
                let answer = self.render_full(root_answer)?;
                debug!(session = %id, "root answer complete");
                return Ok(Step::Done { answer });
            };

            let Some(context) = self.select_context(id, target)? else {
                return Ok(Step::Blocked);
            };

            let rendering = context.rendering(&self.db)?;
            if let Some(action) = self.automation.get(&rendering).cloned() {
                if self.session(id)?.visited.contains(&rendering) {
                    debug!(session = %id, "automation revisited a rendering; asking the driver");
                } else {
                    self.session_mut(id)?.visited.insert(rendering.clone());
                    debug!(session = %id, %action, "replaying cached action");
                    match self.apply(id, &context, &action) {
                        Ok(()) => continue,
                        Err(error) if error.is_recoverable() => {
                            warn!(%error, "cached action no longer applies; forgetting it");
                            self.automation.forget(&rendering);
                        }
                        Err(error) => return Err(error),
                    }
                }
            }

            let session = self.session_mut(id)?;
            session.visited.clear();
            session.current = Some(context);
            return Ok(Step::Prompt { rendering });
        }
    }

    /// Apply the driver's action to the context most recently presented.
    /// On success the action is remembered against that rendering; on a
    /// recoverable error the context stays current and nothing changes.
    pub fn act(&mut self, id: SessionId, action: &Action) -> Result<()> {
        let context = self
            .session_mut(id)?
            .current
            .take()
            .ok_or(QuiltError::NoCurrentContext)?;
        let rendering = context.rendering(&self.db)?;
        match self.apply(id, &context, action) {
            Ok(()) => {
                self.automation.remember(rendering, action.clone());
                Ok(())
            }
            Err(error) => {
                if error.is_recoverable() {
                    self.session_mut(id)?.current = Some(context);
                }
                Err(error)
            }
        }
    }

    fn session(&self, id: SessionId) -> Result<&Session> {
        self.sessions
            .get(&id)
            .ok_or_else(|| QuiltError::UnknownSession(id.to_string()))
    }

    fn session_mut(&mut self, id: SessionId) -> Result<&mut Session> {
        self.sessions
            .get_mut(&id)
            .ok_or_else(|| QuiltError::UnknownSession(id.to_string()))
    }

    /// First unfulfilled promise in the hypertext tree under `addr`, or
    /// `None` when the whole tree is concrete. The recursion mirrors what
    /// the asker of the root question cares about: a reply that still
    /// contains promises is not yet an answer.
    fn choose_promise(
        &self,
        addr: Address,
        seen: &mut HashSet<Address>,
    ) -> Result<Option<Address>> {
        if !self.db.is_fulfilled(addr)? {
            return Ok(Some(addr));
        }
        if !seen.insert(self.db.resolve(addr)?) {
            return Ok(None);
        }
        let links = self.db.deref(addr)?.links();
        for link in links {
            if let Some(promise) = self.choose_promise(link, seen)? {
                return Ok(Some(promise));
            }
        }
        Ok(None)
    }

    /// Pick the context to present: the successor of the last action if
    /// there is one, else the first ready context that can advance `target`.
    fn select_context(&mut self, id: SessionId, target: Address) -> Result<Option<Context>> {
        if let Some(successor) = self.session_mut(id)?.successor.take() {
            return Ok(Some(successor));
        }
        let ready: Vec<Context> = self.session(id)?.ready.iter().cloned().collect();
        for (i, context) in ready.iter().enumerate() {
            if self.can_advance(context, target, &mut HashSet::new())? {
                self.session_mut(id)?.ready.remove(i);
                return Ok(Some(context.clone()));
            }
        }
        Ok(None)
    }

    /// Whether presenting `context` can (transitively) advance `target`:
    /// either its workspace owns the promise, or some context parked on one
    /// of its promises does.
    fn can_advance(
        &self,
        context: &Context,
        target: Address,
        seen: &mut HashSet<Address>,
    ) -> Result<bool> {
        if !seen.insert(context.workspace()) {
            return Ok(false);
        }
        let node = context.node(&self.db)?;
        let target = self.db.resolve(target)?;
        let own = [node.answer_promise, node.final_workspace_promise];
        for promise in own {
            if self.db.resolve(promise)? == target {
                return Ok(true);
            }
        }
        for promise in own {
            for token in self.db.waiters(promise)? {
                if let Some(parked) = self.parked.get(&token) {
                    if self.can_advance(&parked.context, target, seen)? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }

    /// Apply `action` to `context` on behalf of session `id`.
    fn apply(&mut self, id: SessionId, context: &Context, action: &Action) -> Result<()> {
        match action {
            Action::Ask(text) => self.apply_ask(id, context, text),
            Action::Scratch(text) => self.apply_scratch(id, context, text),
            Action::Unlock(pointer) => self.apply_unlock(id, context, *pointer),
            Action::Reply(text) => self.apply_reply(context, text),
        }
    }

    fn apply_ask(&mut self, id: SessionId, context: &Context, text: &str) -> Result<()> {
        let (_, pointers) = context.pointer_names(&self.db)?;
        let sub_question = insert_hypertext(&mut self.db, text, &pointers)?;
        let node = context.node(&self.db)?;

        let child = workspace::new_child(&mut self.db, sub_question, context.workspace())?;

        let mut subentries = node.subentries.clone();
        subentries.push(SubEntry {
            question: sub_question,
            answer: child.node.answer_promise,
            workspace: child.node.final_workspace_promise,
        });
        let successor = workspace::intern_workspace(
            &mut self.db,
            WorkspaceNode {
                predecessor: Some(context.workspace()),
                question: node.question,
                scratchpad: node.scratchpad,
                subentries,
                answer_promise: node.answer_promise,
                final_workspace_promise: node.final_workspace_promise,
            },
        )?;

        let successor_context = Context::new(
            successor.address,
            context.successor_unlocks(successor.address, &[sub_question]),
        );
        let child_context = Context::with_default_unlocks(&self.db, child.address)?;

        debug!(
            session = %id,
            child = %child.address,
            successor = %successor.address,
            "sub-question asked"
        );
        let session = self.session_mut(id)?;
        session.successor = Some(successor_context);
        session.ready.push_back(child_context);
        Ok(())
    }

    fn apply_scratch(&mut self, id: SessionId, context: &Context, text: &str) -> Result<()> {
        let (_, pointers) = context.pointer_names(&self.db)?;
        let scratchpad = insert_hypertext(&mut self.db, text, &pointers)?;
        let node = context.node(&self.db)?;

        let successor = workspace::intern_workspace(
            &mut self.db,
            WorkspaceNode {
                predecessor: Some(context.workspace()),
                question: node.question,
                scratchpad,
                subentries: node.subentries.clone(),
                answer_promise: node.answer_promise,
                final_workspace_promise: node.final_workspace_promise,
            },
        )?;

        let successor_context = Context::new(
            successor.address,
            context.successor_unlocks(successor.address, &[scratchpad]),
        );
        debug!(session = %id, successor = %successor.address, "scratchpad rewritten");
        self.session_mut(id)?.successor = Some(successor_context);
        Ok(())
    }

    fn apply_unlock(&mut self, id: SessionId, context: &Context, pointer: PointerId) -> Result<()> {
        let (_, pointers) = context.pointer_names(&self.db)?;
        let addr = *pointers
            .get(&pointer)
            .ok_or_else(|| QuiltError::UnknownPointer(pointer.to_string()))?;
        if context.is_unlocked(addr) {
            return Err(QuiltError::AlreadyUnlocked(pointer.to_string()));
        }

        let successor = context.unlock(addr);
        if self.db.is_fulfilled(addr)? {
            self.session_mut(id)?.successor = Some(successor);
            return Ok(());
        }

        let token = WakeToken(self.next_token);
        self.next_token += 1;
        if self.db.register_waiter(addr, token)? {
            debug!(session = %id, awaiting = %addr, "successor parked on promise");
            self.parked.insert(
                token,
                ParkedContext {
                    session: id,
                    context: successor,
                    awaiting: addr,
                },
            );
        } else {
            self.session_mut(id)?.successor = Some(successor);
        }
        Ok(())
    }

    fn apply_reply(&mut self, context: &Context, text: &str) -> Result<()> {
        let (_, pointers) = context.pointer_names(&self.db)?;
        let answer = build_hypertext(&mut self.db, text, &pointers)?;
        let node = context.node(&self.db)?;

        // Deduplication can collapse two asks onto one child workspace, in
        // which case a replayed reply meets promises that are already
        // settled; those are skipped, not an error.
        if !self.db.is_fulfilled(node.answer_promise)? {
            let delivered = self.db.fulfil(node.answer_promise, answer)?;
            self.wake(delivered);
        }
        if !self.db.is_fulfilled(node.final_workspace_promise)? {
            let content = self.db.deref(context.workspace())?.clone();
            let delivered = self.db.fulfil(node.final_workspace_promise, content)?;
            self.wake(delivered);
        }
        debug!(workspace = %context.workspace(), "reply taken");
        Ok(())
    }

    /// Move every parked context whose token was delivered back onto its
    /// session's ready queue.
    fn wake(&mut self, delivered: Vec<WakeToken>) {
        for token in delivered {
            let Some(parked) = self.parked.remove(&token) else {
                warn!(?token, "delivered token had no parked context");
                continue;
            };
            debug!(session = %parked.session, awaiting = %parked.awaiting, "waking parked context");
            if let Some(session) = self.sessions.get_mut(&parked.session) {
                session.ready.push_back(parked.context);
            }
        }
    }

    /// Render `addr` with every pointer expanded, the shape of a finished
    /// root answer.
    fn render_full(&self, addr: Address) -> Result<String> {
        let mut texts = HashMap::new();
        let content = self.db.deref(addr)?;
        for link in content.links() {
            self.expand_into(link, &mut texts)?;
        }
        Ok(content.to_text(&|a| expanded(&texts, a)))
    }

    fn expand_into(&self, addr: Address, texts: &mut HashMap<Address, String>) -> Result<()> {
        if texts.contains_key(&addr) {
            return Ok(());
        }
        let content = self.db.deref(addr)?;
        let links = content.links();
        for link in &links {
            self.expand_into(*link, texts)?;
        }
        let inner = content.to_text(&|a| expanded(texts, a));
        texts.insert(addr, format!("[{}]", inner));
        Ok(())
    }
}

fn expanded(texts: &HashMap<Address, String>, addr: Address) -> String {
    texts
        .get(&addr)
        .cloned()
        .unwrap_or_else(|| addr.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automation_cache_remembers_and_forgets() {
        let mut cache = AutomationCache::new();
        assert!(cache.is_empty());
        cache.remember("Question: hi\n".to_string(), Action::Reply("hello".to_string()));
        assert_eq!(
            cache.get("Question: hi\n"),
            Some(&Action::Reply("hello".to_string()))
        );
        cache.forget("Question: hi\n");
        assert!(cache.get("Question: hi\n").is_none());
    }

    #[test]
    fn test_start_session_presents_the_root_question() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.start_session("what is your quest?").unwrap();
        match scheduler.next_step(id).unwrap() {
            Step::Prompt { rendering } => {
                assert_eq!(rendering, "Question: what is your quest?\nScratchpad: \n");
            }
            other => panic!("expected a prompt, got {:?}", other),
        }
    }

    #[test]
    fn test_act_without_a_prompt_is_an_error() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.start_session("q?").unwrap();
        let err = scheduler
            .act(id, &Action::Reply("early".to_string()))
            .unwrap_err();
        assert!(matches!(err, QuiltError::NoCurrentContext));
    }

    #[test]
    fn test_recoverable_error_keeps_the_context_current() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.start_session("q?").unwrap();
        let first = scheduler.next_step(id).unwrap();

        let err = scheduler
            .act(id, &Action::Unlock(quilt_core::PointerId::SubAnswer(9)))
            .unwrap_err();
        assert!(matches!(err, QuiltError::UnknownPointer(_)));

        // Nothing changed; the same context is presented again.
        assert_eq!(scheduler.next_step(id).unwrap(), first);
        assert!(scheduler.automation().is_empty());
    }
}
