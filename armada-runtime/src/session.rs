//! Client sessions: submitting invocations, uploading data and materializations.

use crate::archive;
use crate::args::{Args, ArgsParts};
use crate::cache::MaterializationCache;
use crate::config::SessionConfig;
use crate::handle::{ResultHandle, ResultHandleCollection};
use crate::task::Task;
use armada_backend::{BackendError, ExecutionBackend};
use armada_core::codec::{Codec, sealed};
use armada_core::{ArmadaError, Invocation, Materialize, Result, ResultId, SessionToken};
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

struct SessionInner<C> {
    token: SessionToken,
    backend: Arc<dyn ExecutionBackend>,
    codec: Arc<C>,
    config: SessionConfig,
    materializations: MaterializationCache,
    /// Set for sessions a worker opens on behalf of a running invocation.
    parent: Option<ResultId>,
    closed: AtomicBool,
}

/// A connection to an execution backend.
///
/// Cloning is cheap and every clone shares the same token and caches. Every
/// invocation and uploaded object is tagged with the session token.
///
/// # Example
///
/// ```rust,ignore
/// let session = Session::open(InMemoryBackend::new(), JsonCodec, SessionConfig::default());
/// let handle = session.invoke(&add, session.args().value(&8).value(&2)).await?;
/// let sum: i64 = handle.wait().await?.get()?;
/// session.close();
/// ```
pub struct Session<C> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Codec> Session<C> {
    /// Open a session with a fresh token.
    pub fn open<B>(backend: B, codec: C, config: SessionConfig) -> Self
    where
        B: ExecutionBackend + 'static,
    {
        Self::with_backend(Arc::new(backend), Arc::new(codec), config)
    }

    /// Open a session over a shared backend.
    pub fn with_backend(
        backend: Arc<dyn ExecutionBackend>,
        codec: Arc<C>,
        config: SessionConfig,
    ) -> Self {
        let token = SessionToken::new(Uuid::new_v4().to_string());
        tracing::info!(session = %token, partition = %config.partition, "Opened session");
        Self::build(token, backend, codec, config, None)
    }

    /// Rejoin an existing session from inside a running invocation.
    pub(crate) fn attach(
        token: SessionToken,
        backend: Arc<dyn ExecutionBackend>,
        codec: Arc<C>,
        config: SessionConfig,
        parent: ResultId,
    ) -> Self {
        Self::build(token, backend, codec, config, Some(parent))
    }

    fn build(
        token: SessionToken,
        backend: Arc<dyn ExecutionBackend>,
        codec: Arc<C>,
        config: SessionConfig,
        parent: Option<ResultId>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                token,
                backend,
                codec,
                config,
                materializations: MaterializationCache::new(),
                parent,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn token(&self) -> &SessionToken {
        &self.inner.token
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> &Arc<C> {
        &self.inner.codec
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.inner.backend
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Release caches. Later submissions and uploads fail with
    /// [`ArmadaError::SessionClosed`]; existing handles keep working.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.materializations.clear();
            tracing::info!(session = %self.inner.token, "Closed session");
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ArmadaError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Start building arguments for [`invoke`](Self::invoke).
    pub fn args(&self) -> Args<C> {
        Args::new(Arc::clone(&self.inner.codec), self.inner.token.clone())
    }

    /// Submit one invocation of `task`. Returns once the backend accepted it.
    pub async fn invoke(&self, task: &Task<C>, args: Args<C>) -> Result<ResultHandle<C>> {
        self.submit(task, args, false).await
    }

    /// Submit one invocation per argument set, in order.
    ///
    /// Every argument set is validated before the first submission, so an
    /// invalid set submits nothing. If the backend rejects a submission part
    /// way through, the invocations already accepted keep running; their ids
    /// are logged with the error.
    pub async fn map_invoke<I>(&self, task: &Task<C>, args: I) -> Result<ResultHandleCollection<C>>
    where
        I: IntoIterator<Item = Args<C>>,
    {
        self.ensure_open()?;
        let batch = args
            .into_iter()
            .map(Args::finish)
            .collect::<Result<Vec<_>>>()?;

        let mut handles = Vec::with_capacity(batch.len());
        for parts in batch {
            match self.submit_parts(task, parts, false).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    if !handles.is_empty() {
                        let submitted: Vec<&str> =
                            handles.iter().map(|h| h.result_id().as_str()).collect();
                        tracing::warn!(
                            task = task.name(),
                            error = %e,
                            ?submitted,
                            "Batch submission stopped part way"
                        );
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!(task = task.name(), count = handles.len(), "Submitted invocations");
        Ok(ResultHandleCollection::new(handles))
    }

    pub(crate) async fn submit(
        &self,
        task: &Task<C>,
        args: Args<C>,
        delegate: bool,
    ) -> Result<ResultHandle<C>> {
        self.ensure_open()?;
        let parts = args.finish()?;
        self.submit_parts(task, parts, delegate).await
    }

    async fn submit_parts(
        &self,
        task: &Task<C>,
        parts: ArgsParts,
        delegate: bool,
    ) -> Result<ResultHandle<C>> {
        let mut invocation = Invocation::new(
            task.name(),
            self.inner.token.clone(),
            self.inner.config.partition.clone(),
        );
        invocation.args = parts.positional;
        invocation.kwargs = parts.named;
        invocation.materializations = parts.materializations;
        invocation.delegate = delegate;
        invocation.parent = self.inner.parent.clone();

        let id = self
            .inner
            .backend
            .submit(invocation)
            .await
            .map_err(|e| match e {
                BackendError::NotFound(id) => {
                    ArmadaError::Argument(format!("argument refers to unknown result '{id}'"))
                }
                other => other.into(),
            })?;
        tracing::debug!(
            session = %self.inner.token,
            task = task.name(),
            result_id = %id,
            delegate,
            "Submitted invocation"
        );
        Ok(ResultHandle::new(id, self.clone()))
    }

    /// Upload a value so it can be passed by handle; the returned handle is
    /// already resolved.
    pub async fn put<T: ?Sized>(&self, value: &T) -> Result<ResultHandle<C>>
    where
        C: sealed::EncodeValue<T>,
    {
        let bytes = self.inner.codec.encode(value).map_err(ArmadaError::Codec)?;
        self.put_bytes(bytes).await
    }

    /// Upload already encoded bytes.
    pub async fn put_bytes(&self, bytes: Bytes) -> Result<ResultHandle<C>> {
        self.ensure_open()?;
        let id = self
            .inner
            .backend
            .upload_blob(bytes.clone())
            .await
            .map_err(|e| ArmadaError::Upload(e.to_string()))?;
        tracing::debug!(session = %self.inner.token, result_id = %id, size = bytes.len(), "Uploaded value");
        Ok(ResultHandle::resolved(id, self.clone(), bytes))
    }

    /// Hash `source` for materialization at `worker_path`. Nothing is uploaded.
    pub async fn materialize(
        &self,
        source: impl AsRef<Path>,
        worker_path: impl Into<PathBuf>,
    ) -> Result<Materialize> {
        let source = source.as_ref().to_path_buf();
        let worker_path = worker_path.into();
        tokio::task::spawn_blocking(move || armada_core::materialize(source, worker_path))
            .await
            .map_err(|e| ArmadaError::Argument(format!("hashing task failed: {e}")))?
    }

    /// Upload the content behind `record` unless this session already uploaded
    /// the same content, and return the record marked as uploaded.
    ///
    /// With `force_upload`, the content is uploaded again and the new object
    /// replaces the remembered one.
    pub async fn upload_materialize(
        &self,
        record: Materialize,
        force_upload: bool,
    ) -> Result<Materialize> {
        self.ensure_open()?;
        let backend = Arc::clone(&self.inner.backend);
        let source = record.source_path.clone();
        let kind = record.kind;

        let id = self
            .inner
            .materializations
            .get_or_upload(&record.content_digest, force_upload, || async move {
                let payload = archive::pack(&source, kind).await?;
                backend
                    .upload_blob(payload)
                    .await
                    .map_err(|e| ArmadaError::Upload(e.to_string()))
            })
            .await?;

        let mut record = record;
        record.mark_uploaded(id);
        Ok(record)
    }

    /// The object this session uploaded for `record`'s content, if any.
    pub fn uploaded_materialization(&self, record: &Materialize) -> Option<ResultId> {
        self.inner.materializations.get(&record.content_digest)
    }
}

impl<C> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &self.inner.token)
            .field("partition", &self.inner.config.partition)
            .field("parent", &self.inner.parent)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}
