//! Error taxonomy for armada operations.

use crate::primitives::ResultId;
use std::path::PathBuf;
use std::time::Duration;

/// Result alias used across the armada crates.
pub type Result<T, E = ArmadaError> = std::result::Result<T, E>;

/// Unified error type for client, cache and worker operations.
#[derive(Debug, thiserror::Error)]
pub enum ArmadaError {
    /// An argument could not be turned into an invocation argument.
    /// Raised before anything is sent to the backend.
    #[error("Invalid argument: {0}")]
    Argument(String),
    /// Uploading data to the backend failed. Not retried.
    #[error("Upload failed: {0}")]
    Upload(String),
    /// Fetching data from the backend failed. Not retried.
    #[error("Retrieval of '{id}' failed: {reason}")]
    Retrieval { id: ResultId, reason: String },
    /// A value was requested from a handle that has not been waited on.
    #[error("Result '{0}' is not ready; call wait() first")]
    NotReady(ResultId),
    /// A delegation chain came back to an identifier it already visited.
    #[error("Delegation cycle detected: '{start}' leads back to '{revisited}'")]
    Cycle { start: ResultId, revisited: ResultId },
    /// A cache entry claimed to be present but its backing file is gone, again.
    #[error("Cache entry for '{id}' is inconsistent: {} is missing", .path.display())]
    Consistency { id: ResultId, path: PathBuf },
    /// Waiting for a result exceeded its deadline.
    #[error("Timed out after {0:?} waiting for a result")]
    Timeout(Duration),
    /// The remote task failed; the message is the task's own error, verbatim.
    #[error("{0}")]
    Remote(String),
    /// A worker received an invocation for a task it does not know.
    #[error("Task '{0}' not found in registry")]
    TaskNotFound(String),
    /// The session was closed before the operation.
    #[error("Session is closed")]
    SessionClosed,
    /// Encoding or decoding a value failed.
    #[error("Codec error: {0:#}")]
    Codec(anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Any other backend failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl ArmadaError {
    /// Wrap a backend failure that happened while fetching `id`.
    pub fn retrieval(id: &ResultId, reason: impl std::fmt::Display) -> Self {
        Self::Retrieval {
            id: id.clone(),
            reason: reason.to_string(),
        }
    }
}
