//! Client and worker runtime for armada.
//!
//! A [`Session`] submits invocations of named [`Task`]s to an execution backend
//! and hands back [`ResultHandle`]s. Handles can be passed as arguments to other
//! invocations without waiting on them. Workers ([`PooledWorker`]) claim ready
//! invocations and run the registered task bodies. A body built with
//! [`Task::with_context`] may delegate its result to a new invocation and give
//! up its worker slot at once, which keeps deep recursion from exhausting
//! workers.
//!
//! ```rust,ignore
//! use armada_runtime::prelude::*;
//!
//! let backend = InMemoryBackend::new();
//! let registry = TaskRegistry::new().with_task(add());
//! PooledWorker::new("worker-1", backend.clone(), registry, JsonCodec).spawn();
//!
//! let session = Session::open(backend, JsonCodec, SessionConfig::default());
//! let handle = session.invoke(&add(), session.args().value(&8).value(&2)).await?;
//! assert_eq!(handle.wait().await?.get::<i64>()?, 10);
//! ```

mod archive;
pub mod args;
pub mod cache;
pub mod config;
pub mod context;
pub mod handle;
#[cfg(feature = "logging")]
pub mod logging;
pub mod registry;
pub mod serialization;
pub mod session;
pub mod task;
pub mod worker;

pub use args::{Args, TaskArgs};
pub use cache::{ObjectStatus, RetrieveOptions};
pub use config::SessionConfig;
pub use context::ExecutionContext;
pub use handle::{ResultHandle, ResultHandleCollection};
pub use registry::TaskRegistry;
pub use session::Session;
pub use task::{Outcome, Task};
pub use worker::PooledWorker;

pub use armada_backend as backend;
pub use armada_core::{ArmadaError, HandleState, Materialize, Result, ResultId, SessionToken};

pub mod prelude {
    pub use crate::args::{Args, TaskArgs};
    pub use crate::cache::RetrieveOptions;
    pub use crate::config::SessionConfig;
    pub use crate::context::ExecutionContext;
    pub use crate::handle::{ResultHandle, ResultHandleCollection};
    pub use crate::registry::TaskRegistry;
    #[cfg(feature = "json")]
    pub use crate::serialization::JsonCodec;
    pub use crate::session::Session;
    pub use crate::task::{Outcome, Task};
    pub use crate::worker::PooledWorker;
    pub use armada_backend::InMemoryBackend;
    pub use armada_core::{ArmadaError, HandleState, Materialize, ResultId};
}
