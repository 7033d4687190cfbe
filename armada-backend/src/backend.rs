//! Backend traits consumed by the armada client and workers.
//!
//! The execution backend owns scheduling, storage and transport. The client only
//! needs the narrow surface of [`ExecutionBackend`]; workers additionally pull work
//! and report outcomes through [`WorkerBackend`].

use armada_core::{ArmadaError, HandleState, Invocation, ResultId};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Error type for backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No result or blob with this identifier.
    #[error("Result not found: {0}")]
    NotFound(ResultId),
    /// The result exists but holds no value yet.
    #[error("Result '{0}' has no value yet")]
    NotReady(ResultId),
    /// A state change that would revisit or leave a final state.
    #[error("Invalid transition for '{id}': {from:?} -> {to:?}")]
    InvalidTransition {
        id: ResultId,
        from: HandleState,
        to: HandleState,
    },
    /// Backend-specific error.
    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<BackendError> for ArmadaError {
    fn from(err: BackendError) -> Self {
        ArmadaError::Backend(err.to_string())
    }
}

/// An invocation handed to a worker, together with the result it must produce.
#[derive(Debug, Clone)]
pub struct Submission {
    pub result_id: ResultId,
    pub invocation: Invocation,
    pub submitted_at: DateTime<Utc>,
}

/// Client-facing backend surface.
///
/// # Example
///
/// ```rust,ignore
/// use armada_backend::{ExecutionBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// let id = backend.upload_blob(Bytes::from_static(b"payload")).await?;
/// assert!(backend.exists(&id).await?);
/// ```
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submit an invocation and return the identifier of its future result.
    ///
    /// Returns immediately; the result starts in `HandleState::Pending`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotFound` if the invocation depends on an unknown result.
    async fn submit(&self, invocation: Invocation) -> Result<ResultId, BackendError>;

    /// Current state of a result, without following delegation.
    async fn get_status(&self, id: &ResultId) -> Result<HandleState, BackendError>;

    /// Bytes of a completed result or an uploaded blob.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::NotReady` if the result holds no value yet.
    async fn fetch_blob(&self, id: &ResultId) -> Result<Bytes, BackendError>;

    /// Store bytes as a new, already completed, remote object.
    async fn upload_blob(&self, data: Bytes) -> Result<ResultId, BackendError>;

    /// Whether a value is stored under `id`.
    async fn exists(&self, id: &ResultId) -> Result<bool, BackendError>;
}

/// Worker-facing backend surface.
#[async_trait]
pub trait WorkerBackend: ExecutionBackend {
    /// Claim up to `limit` invocations whose dependencies have all completed.
    ///
    /// A claimed submission is not handed out again. Invocations with a failed
    /// dependency are failed by the backend instead of being returned.
    async fn claim_ready(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<Submission>, BackendError>;

    /// Store the value of a finished task.
    async fn complete(&self, id: &ResultId, value: Bytes) -> Result<(), BackendError>;

    /// Hand the result `id` over to `child`.
    async fn delegate(&self, id: &ResultId, child: &ResultId) -> Result<(), BackendError>;

    /// Record a task failure; `error` is kept verbatim.
    async fn fail(&self, id: &ResultId, error: String) -> Result<(), BackendError>;
}
