use std::io;

use thiserror::Error;

use crate::host;

/// A failure reported by the host event loop for a stream operation.
///
/// Carries the signed status code returned or reported by the loop (negative `errno` values, or
/// [`host::EOF`]) together with a human-readable message derived from it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("stream operation failed with status {status}: {message}")]
pub struct StreamError {
    status: i32,
    message: String,
}

impl StreamError {
    /// Creates an error for a status code reported by the host loop.
    #[must_use]
    pub fn new(status: i32) -> Self {
        Self {
            status,
            message: describe_status(status),
        }
    }

    /// The status code reported by the host loop.
    #[must_use]
    pub fn status(&self) -> i32 {
        self.status
    }

    /// The human-readable description of the status code.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The outcome of a rejected [`Future`][crate::Future].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The host loop reported a failure for the operation the future represents.
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// The promise was dropped or reset before it was resolved or rejected.
    #[error("promise was dropped before it was settled")]
    Broken,
}

#[cfg_attr(test, mutants::skip)] // No API contract for error message.
fn describe_status(status: i32) -> String {
    match status {
        host::EOF => "end of stream".to_string(),
        s if s < 0 => s
            .checked_neg()
            .map_or_else(|| "unknown error".to_string(), |errno| {
                io::Error::from_raw_os_error(errno).to_string()
            }),
        _ => "not an error".to_string(),
    }
}
