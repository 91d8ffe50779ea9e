//! Canonical error type for the object-state engine.
//!
//! ## Error Kinds
//!
//! | Kind | Raised when | Aborts snapshot |
//! |------|-------------|-----------------|
//! | Misuse | mutation outside a transaction, mutation of a disposed object, side effects in a side-effect-free computation, reading before the object existed | yes |
//! | Reentrance | a call violates the reentrance policy of an in-flight call | yes (the new one never starts) |
//! | Canceled | a call was superseded by `CancelPrevious` | yes |
//! | NotFound | a revision lookup walked off the root sentinel | yes |
//! | Conflict | reported by rebase; never raised by commit itself | no |

use crate::types::{ObjectId, Timestamp};
use thiserror::Error;

/// All engine errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// API misuse (illegal mutation, side effect, missing transaction)
    #[error("misuse: {0}")]
    Misuse(String),

    /// Reentrance policy violation
    #[error("reentrance: {0}")]
    Reentrance(String),

    /// The operation was canceled in favor of a newer invocation
    #[error("canceled: {0}")]
    Canceled(String),

    /// Object does not exist at the reader's point in time
    #[error("object {object} doesn't exist in snapshot {stamp} ({hint})")]
    NotFound {
        /// Object that was looked up
        object: ObjectId,
        /// Timestamp of the reading snapshot
        stamp: Timestamp,
        /// Hint of the reading snapshot
        hint: String,
    },

    /// Write conflict surfaced to a caller that asked for it
    #[error("conflict: {0}")]
    Conflict(String),

    /// Invalid configuration
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Error raised by user code inside a transaction or computation
    #[error("{0}")]
    User(String),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a misuse error
    pub fn misuse(msg: impl Into<String>) -> Self {
        Error::Misuse(msg.into())
    }

    /// Create an error carrying a message from user code
    pub fn user(msg: impl Into<String>) -> Self {
        Error::User(msg.into())
    }

    /// Check if this error is retryable.
    ///
    /// Conflicts and cancellations may succeed when retried against fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::Canceled(_))
    }

    /// Check if this is a misuse error.
    pub fn is_misuse(&self) -> bool {
        matches!(self, Error::Misuse(_))
    }

    /// Check if this is a reentrance error.
    pub fn is_reentrance(&self) -> bool {
        matches!(self, Error::Reentrance(_))
    }

    /// Check if this is a cancellation.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Check if this is a serious/unrecoverable error.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}
