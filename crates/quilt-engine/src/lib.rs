//! # quilt-engine
//!
//! The scheduling engine of the Quilt question-answering test bed.
//!
//! This crate provides:
//! - Immutable workspace construction over the content-addressed store
//! - Contexts: a workspace seen through a set of unlocked pointers
//! - The four user actions and their application
//! - A memoising scheduler with explicit park/wake bookkeeping
//! - Root-question sessions with lazy, demand-driven context selection
//! - JSON snapshot persistence for the whole engine state
//!
//! Everything here is a single-threaded, cooperative state machine: no
//! async, no I/O except in the snapshot module.

mod actions;
mod context;
mod scheduler;
mod session;
mod snapshot;
mod workspace;

pub use actions::Action;
pub use context::Context;
pub use scheduler::{AutomationCache, ParkedContext, Scheduler, Step};
pub use session::{drive, Driver, Session, SessionId};
pub use snapshot::{load_state, save_state, Snapshot, SNAPSHOT_VERSION};
pub use workspace::{
    default_unlocked, intern_workspace, new_child, new_root, node_at, WorkspaceHandle,
};
