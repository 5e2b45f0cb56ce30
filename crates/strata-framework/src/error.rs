//! Error types for the Strata framework.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors produced while accumulating request parameters.
///
/// Parameter errors are cached per request, so every caller observes the same
/// value; the type is therefore `Clone` and carries messages rather than
/// source errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    /// A malformed percent-escape or invalid UTF-8 in an encoded pair.
    #[error("malformed parameter encoding: {0}")]
    Decode(String),

    /// A structurally invalid multipart body.
    #[error("malformed multipart body: {0}")]
    Multipart(String),

    /// The body exceeded the configured limit.
    #[error("request body exceeds {limit} bytes")]
    TooLarge {
        /// Configured limit in bytes.
        limit: u64,
    },

    /// Reading the request input failed.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// Storing an uploaded file failed.
    #[error("failed to store upload: {0}")]
    Upload(String),
}

impl ParamsError {
    /// Creates a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Creates a multipart error.
    pub fn multipart(msg: impl Into<String>) -> Self {
        Self::Multipart(msg.into())
    }
}

/// Raised by the timeout supervisor when a wrapped application misses its
/// deadline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("request {request_id} timed out after {after:?}")]
pub struct TimeoutError {
    /// The deadline that elapsed.
    pub after: Duration,
    /// Identifier of the timed-out request.
    pub request_id: u64,
}

/// Errors reported by the static file responder.
#[derive(Debug, Error)]
pub enum FilesError {
    /// The request path resolves outside the root directory.
    #[error("path escapes the root directory: {0}")]
    Forbidden(String),

    /// The request path could not be decoded.
    #[error("undecodable request path: {0}")]
    BadPath(String),

    /// The file could not be opened or inspected.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The path being served.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for parameter operations.
pub type ParamsResult<T> = Result<T, ParamsError>;
