//! What a running task can reach besides its arguments.

use crate::args::Args;
use crate::cache::{RetrieveOptions, WorkerObjectCache};
use crate::handle::{ResultHandle, ResultHandleCollection};
use crate::session::Session;
use crate::task::{Outcome, Task};
use armada_core::codec::{Codec, sealed};
use armada_core::{ArmadaError, Result, ResultId};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-invocation context handed to tasks created with
/// [`Task::with_context`](crate::task::Task::with_context).
///
/// Invocations submitted from here join the caller's session.
pub struct ExecutionContext<C> {
    session: Session<C>,
    result_id: ResultId,
    task_name: Arc<str>,
    objects: Arc<WorkerObjectCache>,
    started_at: DateTime<Utc>,
    span: tracing::Span,
}

impl<C: Codec> ExecutionContext<C> {
    pub(crate) fn new(
        session: Session<C>,
        result_id: ResultId,
        task_name: &str,
        objects: Arc<WorkerObjectCache>,
        span: tracing::Span,
    ) -> Self {
        Self {
            session,
            result_id,
            task_name: Arc::from(task_name),
            objects,
            started_at: Utc::now(),
            span,
        }
    }

    /// The result this invocation produces.
    pub fn result_id(&self) -> &ResultId {
        &self.result_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn codec(&self) -> &Arc<C> {
        self.session.codec()
    }

    /// Span the task body runs in; events logged by the body carry its fields.
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn args(&self) -> Args<C> {
        self.session.args()
    }

    /// Submit a sub-invocation; the caller keeps its worker slot until it returns.
    pub async fn invoke(&self, task: &Task<C>, args: Args<C>) -> Result<ResultHandle<C>> {
        self.session.invoke(task, args).await
    }

    pub async fn map_invoke<I>(&self, task: &Task<C>, args: I) -> Result<ResultHandleCollection<C>>
    where
        I: IntoIterator<Item = Args<C>>,
    {
        self.session.map_invoke(task, args).await
    }

    /// Hand this invocation's result over to a new invocation of `task`.
    ///
    /// Return the outcome from the task body: the worker then records the
    /// delegation and frees its slot without waiting for the child.
    pub async fn delegate<O>(&self, task: &Task<C>, args: Args<C>) -> Result<Outcome<O>> {
        let child = self.session.submit(task, args, true).await?;
        tracing::debug!(
            parent = %self.result_id,
            child = %child.result_id(),
            task = task.name(),
            "Delegating result"
        );
        Ok(Outcome::Delegated(child.result_id().clone()))
    }

    pub async fn put<T: ?Sized>(&self, value: &T) -> Result<ResultHandle<C>>
    where
        C: sealed::EncodeValue<T>,
    {
        self.session.put(value).await
    }

    /// Fetch a remote object into the worker cache and return its local path.
    pub async fn retrieve_object(&self, id: &ResultId, options: RetrieveOptions) -> Result<PathBuf> {
        self.objects
            .retrieve(
                Arc::clone(self.session.backend()),
                self.session.token(),
                id,
                options,
            )
            .await
    }

    /// [`retrieve_object`](Self::retrieve_object), then decode the file.
    pub async fn retrieve_value<T>(&self, id: &ResultId, options: RetrieveOptions) -> Result<T>
    where
        C: sealed::DecodeValue<T>,
    {
        let path = self.retrieve_object(id, options).await?;
        let bytes = tokio::fs::read(&path).await?;
        self.codec()
            .decode(Bytes::from(bytes))
            .map_err(ArmadaError::Codec)
    }

    /// Where the object would be cached locally. Nothing is fetched.
    pub fn get_object_path(&self, id: &ResultId) -> PathBuf {
        self.objects.object_path(self.session.token(), id)
    }

    pub fn object_exists_locally(&self, id: &ResultId) -> bool {
        self.objects.object_exists_locally(self.session.token(), id)
    }
}

impl<C> Clone for ExecutionContext<C> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            result_id: self.result_id.clone(),
            task_name: Arc::clone(&self.task_name),
            objects: Arc::clone(&self.objects),
            started_at: self.started_at,
            span: self.span.clone(),
        }
    }
}

impl<C> fmt::Debug for ExecutionContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("result_id", &self.result_id)
            .field("task_name", &self.task_name)
            .field("started_at", &self.started_at)
            .finish()
    }
}
