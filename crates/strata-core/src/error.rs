//! Error types shared by every Strata component.
//!
//! Framework-level errors (parameter decoding, timeouts, file serving) are
//! defined in `strata-framework`.

use thiserror::Error;

/// Errors carried through a streaming [`Body`](crate::Body).
#[derive(Debug, Error)]
pub enum BodyError {
    /// Underlying I/O failure while producing or transforming chunks.
    #[error("body I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The producer went away without sending the end signal.
    #[error("body producer dropped before end")]
    Aborted,

    /// The input stream of the environment was already consumed.
    #[error("request input already taken")]
    InputTaken,

    /// Custom producer error.
    #[error("{0}")]
    Custom(String),
}

impl BodyError {
    /// Creates a custom body error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Violations of the single-completion protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompletionError {
    /// The completion handle was dropped without a response.
    #[error("completion dropped without a response")]
    Dropped,
}

/// Result type for body operations.
pub type BodyResult<T> = Result<T, BodyError>;
