//! Pooled worker that claims ready invocations and runs their tasks.
//!
//! Several workers may poll the same backend. Each claims invocations whose
//! dependencies are terminal, places their materializations, resolves handle
//! arguments and runs the registered task body. A task that delegates frees its
//! slot immediately; its result is finished by the delegated invocation.

use crate::archive;
use crate::args::{ResolvedArg, TaskArgs};
use crate::cache::{PlacementCache, RetrieveOptions, WorkerObjectCache};
use crate::config::SessionConfig;
use crate::context::ExecutionContext;
use crate::handle::{Resolution, resolve};
use crate::registry::TaskRegistry;
use crate::session::Session;
use crate::task::TaskReturn;
use armada_backend::{ExecutionBackend, Submission, WorkerBackend};
use armada_core::codec::Codec;
use armada_core::{Argument, ArmadaError, Invocation, ResultId};
use bytes::Bytes;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::Instrument;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A worker that claims and executes invocations from a shared backend.
///
/// # Example
///
/// ```rust,ignore
/// let registry = TaskRegistry::new().with_task(add()).with_task(count_down());
/// let worker = PooledWorker::new("worker-1", backend.clone(), registry, JsonCodec)
///     .with_max_concurrency(NonZeroUsize::new(4).unwrap());
/// let handle = worker.spawn();
/// ```
pub struct PooledWorker<B, C> {
    worker_id: String,
    backend: Arc<B>,
    registry: Arc<TaskRegistry<C>>,
    codec: Arc<C>,
    objects: Arc<WorkerObjectCache>,
    placements: Arc<PlacementCache>,
    session_config: SessionConfig,
    batch_size: NonZeroUsize,
    max_concurrency: NonZeroUsize,
    poll_interval: Duration,
}

impl<B, C> PooledWorker<B, C>
where
    B: WorkerBackend + 'static,
    C: Codec,
{
    pub fn new(worker_id: impl Into<String>, backend: B, registry: TaskRegistry<C>, codec: C) -> Self {
        let session_config = SessionConfig::default();
        Self {
            worker_id: worker_id.into(),
            backend: Arc::new(backend),
            registry: Arc::new(registry),
            codec: Arc::new(codec),
            objects: Arc::new(WorkerObjectCache::new(session_config.cache_root.clone())),
            placements: Arc::new(PlacementCache::new()),
            session_config,
            batch_size: NonZeroUsize::MIN,
            max_concurrency: NonZeroUsize::MIN,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Number of invocations claimed per poll (default: 1).
    #[must_use]
    pub fn with_batch_size(mut self, size: NonZeroUsize) -> Self {
        self.batch_size = size;
        self
    }

    /// Maximum number of task bodies running at once (default: 1).
    #[must_use]
    pub fn with_max_concurrency(mut self, max: NonZeroUsize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Delay before polling again when nothing was ready.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Root directory of the object cache.
    #[must_use]
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.session_config.cache_root = root.into();
        self.objects = Arc::new(WorkerObjectCache::new(self.session_config.cache_root.clone()));
        self
    }

    /// Settings for sessions joined by running tasks. Also sets the cache root.
    #[must_use]
    pub fn with_session_config(self, config: SessionConfig) -> Self {
        let root = config.cache_root.clone();
        Self {
            session_config: config,
            ..self
        }
        .with_cache_root(root)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn object_cache(&self) -> &Arc<WorkerObjectCache> {
        &self.objects
    }

    pub fn placements(&self) -> &Arc<PlacementCache> {
        &self.placements
    }

    /// Run one claimed submission and report its outcome to the backend.
    ///
    /// Task failures are recorded on the result and are not errors of this
    /// call; only backend failures while reporting are.
    pub async fn execute_submission(&self, submission: Submission) -> anyhow::Result<()> {
        let Submission {
            result_id,
            invocation,
            ..
        } = submission;
        let span = tracing::info_span!(
            "task",
            worker_id = %self.worker_id,
            task = %invocation.task_name,
            result_id = %result_id,
        );

        let task_span = span.clone();
        async move {
            match self.run_invocation(&result_id, invocation, task_span).await {
                Ok(TaskReturn::Value(bytes)) => {
                    self.backend.complete(&result_id, bytes).await?;
                    tracing::debug!("Task completed");
                }
                Ok(TaskReturn::Delegated(child)) => {
                    self.backend.delegate(&result_id, &child).await?;
                    tracing::debug!(child = %child, "Task delegated its result");
                }
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::warn!(error = %error, "Task failed");
                    self.backend.fail(&result_id, error).await?;
                }
            }
            Ok::<_, anyhow::Error>(())
        }
        .instrument(span)
        .await
    }

    async fn run_invocation(
        &self,
        result_id: &ResultId,
        invocation: Invocation,
        span: tracing::Span,
    ) -> anyhow::Result<TaskReturn> {
        let task = self
            .registry
            .get(&invocation.task_name)
            .cloned()
            .ok_or_else(|| ArmadaError::TaskNotFound(invocation.task_name.clone()))?;

        let backend: Arc<dyn ExecutionBackend> = self.backend.clone();
        let config = self
            .session_config
            .clone()
            .with_partition(invocation.partition.clone());
        let session = Session::attach(
            invocation.session.clone(),
            Arc::clone(&backend),
            Arc::clone(&self.codec),
            config,
            result_id.clone(),
        );
        let context = ExecutionContext::new(
            session,
            result_id.clone(),
            task.name(),
            Arc::clone(&self.objects),
            span,
        );

        for record in &invocation.materializations {
            let id = record.uploaded_id().ok_or_else(|| {
                ArmadaError::Argument(format!(
                    "{} was submitted without being uploaded",
                    record.source_path.display()
                ))
            })?;
            let cached = context
                .retrieve_object(id, RetrieveOptions::default().check_exists(true))
                .await?;
            // Tasks sharing a worker path wait here; content already in place is kept.
            self.placements
                .place_with(&record.worker_path, &record.content_digest, || {
                    archive::place(&cached, &record.worker_path, record.kind)
                })
                .await?;
        }

        let poll = self.session_config.poll_interval();
        let positional = try_join_all(
            invocation
                .args
                .iter()
                .map(|arg| resolve_argument(backend.as_ref(), arg, poll)),
        )
        .await?;
        let mut named = BTreeMap::new();
        for (name, arg) in &invocation.kwargs {
            named.insert(name.clone(), resolve_argument(backend.as_ref(), arg, poll).await?);
        }
        let args = TaskArgs::from_resolved(Arc::clone(&self.codec), positional, named);

        tracing::debug!("Running task");
        task.run(context, args).await
    }

    /// Poll for ready invocations and execute them until an error occurs.
    ///
    /// Execution is gated by a semaphore sized by `max_concurrency`.
    pub async fn start_polling(self) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency.get()));
        let worker = Arc::new(self);
        let mut interval = time::interval(worker.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            worker_id = %worker.worker_id,
            max_concurrency = worker.max_concurrency.get(),
            batch_size = worker.batch_size.get(),
            "Worker polling for invocations"
        );

        loop {
            // Wait for available capacity
            let permit = semaphore.clone().acquire_owned().await?;
            let limit = worker
                .batch_size
                .get()
                .min(semaphore.available_permits() + 1);

            let submissions = worker.backend.claim_ready(&worker.worker_id, limit).await?;
            if submissions.is_empty() {
                drop(permit);
                interval.tick().await;
                continue;
            }

            let mut permit = Some(permit);
            for submission in submissions {
                let permit = match permit.take() {
                    Some(permit) => permit,
                    None => semaphore.clone().acquire_owned().await?,
                };
                let worker = Arc::clone(&worker);
                tokio::spawn(async move {
                    let _permit = permit; // Hold permit until the task is reported
                    let result_id = submission.result_id.clone();
                    if let Err(e) = worker.execute_submission(submission).await {
                        tracing::error!(
                            worker_id = %worker.worker_id,
                            result_id = %result_id,
                            error = %e,
                            "Failed to report task outcome"
                        );
                    }
                });
            }
        }
    }

    /// Run [`start_polling`](Self::start_polling) on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.start_polling())
    }
}

impl<B, C> Clone for PooledWorker<B, C> {
    fn clone(&self) -> Self {
        Self {
            worker_id: self.worker_id.clone(),
            backend: Arc::clone(&self.backend),
            registry: Arc::clone(&self.registry),
            codec: Arc::clone(&self.codec),
            objects: Arc::clone(&self.objects),
            placements: Arc::clone(&self.placements),
            session_config: self.session_config.clone(),
            batch_size: self.batch_size,
            max_concurrency: self.max_concurrency,
            poll_interval: self.poll_interval,
        }
    }
}

async fn resolve_argument(
    backend: &dyn ExecutionBackend,
    arg: &Argument,
    poll: Duration,
) -> armada_core::Result<ResolvedArg> {
    match arg {
        Argument::Value(bytes) => Ok(ResolvedArg::One(bytes.clone())),
        Argument::Handle(id) => Ok(ResolvedArg::One(resolve_value(backend, id, poll).await?)),
        Argument::Collection(ids) => {
            let values = try_join_all(ids.iter().map(|id| resolve_value(backend, id, poll))).await?;
            Ok(ResolvedArg::Many(values))
        }
    }
}

async fn resolve_value(
    backend: &dyn ExecutionBackend,
    id: &ResultId,
    poll: Duration,
) -> armada_core::Result<Bytes> {
    match resolve(backend, id, poll).await? {
        Resolution::Completed { value, .. } => Ok(value),
        Resolution::Failed { error, .. } => Err(ArmadaError::Remote(error)),
    }
}
