//! Execution backend layer for armada.
//!
//! The backend schedules invocations, stores results and blobs, and hands ready
//! work to workers. Real deployments implement these traits over their own
//! transport; this crate ships the traits and an in-memory reference backend.
//!
//! # Architecture
//!
//! - **ExecutionBackend**: the narrow surface a client needs (submit, status,
//!   fetch, upload, existence).
//! - **WorkerBackend**: what a worker needs on top (claim ready work, report
//!   completion, delegation or failure).
//! - **InMemoryBackend**: a single-process implementation of both, used by tests
//!   and local runs.
//!
//! # Implementing Custom Backends
//!
//! ```rust,ignore
//! use armada_backend::{BackendError, ExecutionBackend};
//! use async_trait::async_trait;
//!
//! pub struct GrpcBackend {
//!     // your client channel
//! }
//!
//! #[async_trait]
//! impl ExecutionBackend for GrpcBackend {
//!     async fn submit(&self, invocation: Invocation) -> Result<ResultId, BackendError> {
//!         // encode and send the invocation
//!     }
//!     // ... implement other methods
//! }
//! ```

mod backend;
mod in_memory;

pub use backend::{BackendError, ExecutionBackend, Submission, WorkerBackend};
pub use in_memory::InMemoryBackend;
