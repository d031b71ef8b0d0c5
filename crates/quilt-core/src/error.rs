//! Unified error types for Quilt

use thiserror::Error;

/// Unified error type for all Quilt operations
#[derive(Error, Debug)]
pub enum QuiltError {
    // Recoverable: reported to the driver, no state change
    #[error("could not parse input: {0}")]
    Parse(String),

    #[error("{0} is not visible in this context")]
    UnknownPointer(String),

    #[error("{0} is already unlocked")]
    AlreadyUnlocked(String),

    // Fatal: these indicate a scheduler bug
    #[error("address {0} is not an unfulfilled promise")]
    DoubleFulfil(String),

    #[error("unknown address: {0}")]
    UnknownAddress(String),

    #[error("address {0} is still pending")]
    PendingContent(String),

    #[error("address {0} does not hold a workspace")]
    NotAWorkspace(String),

    #[error("alias chain does not terminate at {0}")]
    AliasCycle(String),

    // Session errors
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("session is blocked: every remaining context waits on a promise")]
    Blocked,

    #[error("no context is awaiting an action")]
    NoCurrentContext,

    // I/O and persistence
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl QuiltError {
    /// Whether the driver can recover by submitting a different action.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::UnknownPointer(_) | Self::AlreadyUnlocked(_)
        )
    }
}

/// Result type alias using QuiltError
pub type Result<T> = std::result::Result<T, QuiltError>;
