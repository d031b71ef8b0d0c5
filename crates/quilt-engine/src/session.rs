//! Root-question sessions and the driver seam
//!
//! A session is one user-facing thread of work bound to a root question. It
//! owns a FIFO of ready contexts and remembers the successor of the last
//! action; the scheduler walks the root answer tree to decide which ready
//! context is worth presenting next (see `Scheduler::next_step`).
//!
//! The driver is the "human": a callable from rendered context to action
//! text, assumed to be a pure function of the rendering. That assumption is
//! what makes replaying the automation cache sound.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use quilt_core::{Address, QuiltError, Result};

use crate::actions::Action;
use crate::context::Context;
use crate::scheduler::{Scheduler, Step};

/// Identifier of one session within the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-session scheduler state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub(crate) id: SessionId,
    /// The workspace the root question was planted in.
    pub(crate) root_workspace: Address,
    /// The promise the session exists to fulfil.
    pub(crate) root_answer: Address,
    /// Contexts that could be presented, oldest first.
    pub(crate) ready: VecDeque<Context>,
    /// The successor of the last applied action, presented next if any.
    pub(crate) successor: Option<Context>,
    /// The context currently awaiting a driver action.
    pub(crate) current: Option<Context>,
    /// Renderings replayed from the cache since the last human input.
    /// Revisiting one means automation is looping.
    pub(crate) visited: HashSet<String>,
}

impl Session {
    pub(crate) fn new(id: SessionId, root_workspace: Address, root_answer: Address) -> Self {
        Self {
            id,
            root_workspace,
            root_answer,
            ready: VecDeque::new(),
            successor: None,
            current: None,
            visited: HashSet::new(),
        }
    }
}

/// The external decision-maker, usually a human at a prompt.
pub trait Driver {
    /// Produce an action line for the presented context.
    fn prompt(&mut self, rendering: &str) -> String;

    /// A recoverable problem with the last action; the same context will be
    /// presented again.
    fn report(&mut self, error: &QuiltError) {
        let _ = error;
    }
}

/// Drive `session` to completion, returning the fully-expanded root answer.
pub fn drive(
    scheduler: &mut Scheduler,
    session: SessionId,
    driver: &mut dyn Driver,
) -> Result<String> {
    loop {
        match scheduler.next_step(session)? {
            Step::Done { answer } => return Ok(answer),
            Step::Blocked => return Err(QuiltError::Blocked),
            Step::Prompt { rendering } => {
                let line = driver.prompt(&rendering);
                let outcome = Action::parse(&line).and_then(|action| scheduler.act(session, &action));
                match outcome {
                    Ok(()) => {}
                    Err(error) if error.is_recoverable() => driver.report(&error),
                    Err(error) => return Err(error),
                }
            }
        }
    }
}
