//! # quilt-core
//!
//! Content-addressed hypertext substrate for the Quilt question-answering
//! test bed.
//!
//! ## Core Paradigm
//!
//! - Everything is hypertext: text fragments holding pointers to more hypertext
//! - Content IS identity: equal canonical forms intern to one address
//! - Answers ARE promises: an address can exist before its content does
//! - Duplicate answers ARE aliases: a promise fulfilled with known content
//!   forwards to the canonical copy
//!
//! This crate has no I/O and no async. The engine crate drives it.

mod address;
mod datastore;
mod error;
mod hypertext;
mod parse;

pub use address::{Address, PointerId};
pub use datastore::{Datastore, Slot, WakeToken};
pub use error::{QuiltError, Result};
pub use hypertext::{Chunk, Hypertext, SubEntry, WorkspaceNode};
pub use parse::{build_hypertext, insert_hypertext, PointerMap};
