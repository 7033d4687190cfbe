use super::{lock, publish_atomically};
use armada_backend::ExecutionBackend;
use armada_core::{ArmadaError, Result, ResultId, SessionToken};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// A failed download keeps only its reason; every waiter rebuilds the error for its own id.
type FetchResult = std::result::Result<PathBuf, String>;

/// Options for [`WorkerObjectCache::retrieve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Reuse a present local copy instead of fetching again.
    pub check_exists: bool,
    /// Always fetch, even if a local copy is present.
    pub force_retrieve: bool,
}

impl RetrieveOptions {
    pub fn check_exists(mut self, check_exists: bool) -> Self {
        self.check_exists = check_exists;
        self
    }

    pub fn force_retrieve(mut self, force_retrieve: bool) -> Self {
        self.force_retrieve = force_retrieve;
        self
    }
}

/// Local status of a remote object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    Absent,
    Downloading,
    Present,
}

struct Flight {
    fetch: Shared<BoxFuture<'static, FetchResult>>,
    /// Set when this download replaces a copy that vanished from disk.
    invalidated: bool,
}

enum Slot {
    Downloading(Arc<Flight>),
    Present { invalidated: bool },
}

/// Worker-local store of fetched remote objects under `root/<session>/<result>`.
///
/// Concurrent retrievals of one object share a single download. Files are
/// written to a staging name and renamed into place.
pub struct WorkerObjectCache {
    root: PathBuf,
    entries: Mutex<HashMap<PathBuf, Slot>>,
}

impl WorkerObjectCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic local path of an object. Nothing is created.
    pub fn object_path(&self, session: &SessionToken, id: &ResultId) -> PathBuf {
        self.root.join(session.as_str()).join(id.as_str())
    }

    pub fn status(&self, session: &SessionToken, id: &ResultId) -> ObjectStatus {
        let path = self.object_path(session, id);
        match lock(&self.entries).get(&path) {
            None => ObjectStatus::Absent,
            Some(Slot::Downloading(_)) => ObjectStatus::Downloading,
            Some(Slot::Present { .. }) => ObjectStatus::Present,
        }
    }

    /// Whether the object is recorded as present and its file is on disk.
    pub fn object_exists_locally(&self, session: &SessionToken, id: &ResultId) -> bool {
        self.status(session, id) == ObjectStatus::Present
            && self.object_path(session, id).is_file()
    }

    /// Make the object available locally and return its path.
    ///
    /// Joins an in-flight download if there is one, so retrievals that overlap
    /// a download never fetch twice. Once the download has finished, a present
    /// copy is reused only with `check_exists`; without it every retrieval
    /// fetches again. `force_retrieve` always fetches. Callers that need
    /// exactly one fetch regardless of timing must pass `check_exists`.
    ///
    /// A copy that disappeared from disk is fetched again once; if it
    /// disappears again the call fails with [`ArmadaError::Consistency`].
    pub async fn retrieve(
        &self,
        backend: Arc<dyn ExecutionBackend>,
        session: &SessionToken,
        id: &ResultId,
        options: RetrieveOptions,
    ) -> Result<PathBuf> {
        let path = self.object_path(session, id);

        let flight = {
            let mut entries = lock(&self.entries);
            match entries.get(&path) {
                Some(Slot::Downloading(flight)) => Arc::clone(flight),
                Some(Slot::Present { invalidated })
                    if options.check_exists && !options.force_retrieve =>
                {
                    if path.is_file() {
                        tracing::debug!(result_id = %id, "Object cache hit");
                        return Ok(path);
                    }
                    if *invalidated {
                        return Err(ArmadaError::Consistency {
                            id: id.clone(),
                            path,
                        });
                    }
                    tracing::warn!(result_id = %id, path = %path.display(), "Cached object vanished; fetching again");
                    self.start_flight(&mut entries, &backend, id, &path, true)
                }
                Some(Slot::Present { invalidated }) if !options.force_retrieve => {
                    let invalidated = *invalidated;
                    self.start_flight(&mut entries, &backend, id, &path, invalidated)
                }
                _ => self.start_flight(&mut entries, &backend, id, &path, false),
            }
        };

        let outcome = flight.fetch.clone().await;

        let mut entries = lock(&self.entries);
        let owns_slot = matches!(
            entries.get(&path),
            Some(Slot::Downloading(current)) if Arc::ptr_eq(current, &flight)
        );
        match outcome {
            Ok(local) => {
                if owns_slot {
                    entries.insert(
                        path,
                        Slot::Present {
                            invalidated: flight.invalidated,
                        },
                    );
                }
                Ok(local)
            }
            Err(err) => {
                if owns_slot {
                    entries.remove(&path);
                }
                Err(ArmadaError::retrieval(id, err))
            }
        }
    }

    fn start_flight(
        &self,
        entries: &mut HashMap<PathBuf, Slot>,
        backend: &Arc<dyn ExecutionBackend>,
        id: &ResultId,
        path: &Path,
        invalidated: bool,
    ) -> Arc<Flight> {
        let backend = Arc::clone(backend);
        let id = id.clone();
        let target = path.to_path_buf();
        let fetch = async move {
            tracing::debug!(result_id = %id, "Fetching remote object");
            let bytes = backend
                .fetch_blob(&id)
                .await
                .map_err(|e| e.to_string())?;
            publish_atomically(&target, &bytes)
                .await
                .map_err(|e| e.to_string())?;
            Ok(target)
        }
        .boxed()
        .shared();

        let flight = Arc::new(Flight { fetch, invalidated });
        entries.insert(path.to_path_buf(), Slot::Downloading(Arc::clone(&flight)));
        flight
    }

    /// Forget every entry. Files on disk are left alone.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

impl std::fmt::Debug for WorkerObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerObjectCache")
            .field("root", &self.root)
            .field("entries", &lock(&self.entries).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_backend::{BackendError, InMemoryBackend};
    use armada_core::{HandleState, Invocation};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::{Barrier, Semaphore};

    /// Holds every fetch until the test opens the gate.
    #[derive(Clone)]
    struct GatedFetch {
        inner: InMemoryBackend,
        gate: Arc<Semaphore>,
    }

    impl GatedFetch {
        fn closed(inner: InMemoryBackend) -> Self {
            Self {
                inner,
                gate: Arc::new(Semaphore::new(0)),
            }
        }
    }

    #[async_trait]
    impl ExecutionBackend for GatedFetch {
        async fn submit(&self, invocation: Invocation) -> std::result::Result<ResultId, BackendError> {
            self.inner.submit(invocation).await
        }
        async fn get_status(&self, id: &ResultId) -> std::result::Result<HandleState, BackendError> {
            self.inner.get_status(id).await
        }
        async fn fetch_blob(&self, id: &ResultId) -> std::result::Result<Bytes, BackendError> {
            let _open = self
                .gate
                .acquire()
                .await
                .map_err(|e| BackendError::Backend(e.to_string()))?;
            self.inner.fetch_blob(id).await
        }
        async fn upload_blob(&self, data: Bytes) -> std::result::Result<ResultId, BackendError> {
            self.inner.upload_blob(data).await
        }
        async fn exists(&self, id: &ResultId) -> std::result::Result<bool, BackendError> {
            self.inner.exists(id).await
        }
    }

    async fn setup() -> (tempfile::TempDir, InMemoryBackend, ResultId, SessionToken) {
        let dir = tempfile::tempdir().unwrap();
        let backend = InMemoryBackend::new();
        let id = backend.upload_blob(Bytes::from_static(b"payload")).await.unwrap();
        (dir, backend, id, SessionToken::new("session-a"))
    }

    #[tokio::test]
    async fn test_retrievals_during_a_download_join_it() {
        let (dir, backend, id, token) = setup().await;
        let cache = WorkerObjectCache::new(dir.path());
        let gated = GatedFetch::closed(backend.clone());
        let remote: Arc<dyn ExecutionBackend> = Arc::new(gated.clone());

        let mut retrievals = Box::pin(futures::future::join_all((0..8).map(|_| {
            cache.retrieve(Arc::clone(&remote), &token, &id, RetrieveOptions::default())
        })));
        // One poll registers every caller while the fetch is held at the gate.
        assert!(futures::poll!(&mut retrievals).is_pending());
        assert_eq!(cache.status(&token, &id), ObjectStatus::Downloading);

        gated.gate.add_permits(1);
        for path in retrievals.await {
            assert_eq!(std::fs::read(path.unwrap()).unwrap(), b"payload");
        }
        assert_eq!(backend.fetch_count(&id), 1);
        assert_eq!(cache.status(&token, &id), ObjectStatus::Present);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checked_retrievals_fetch_once() {
        let (dir, backend, id, token) = setup().await;
        let cache = Arc::new(WorkerObjectCache::new(dir.path()));
        let remote: Arc<dyn ExecutionBackend> = Arc::new(backend.clone());
        let start = Arc::new(Barrier::new(8));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let remote = Arc::clone(&remote);
                let start = Arc::clone(&start);
                let id = id.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    start.wait().await;
                    let reuse = RetrieveOptions::default().check_exists(true);
                    cache.retrieve(remote, &token, &id, reuse).await
                })
            })
            .collect();

        for task in tasks {
            let path = task.await.unwrap().unwrap();
            assert_eq!(std::fs::read(path).unwrap(), b"payload");
        }
        assert_eq!(backend.fetch_count(&id), 1);
    }

    #[tokio::test]
    async fn test_check_exists_reuses_local_copy() {
        let (dir, backend, id, token) = setup().await;
        let cache = WorkerObjectCache::new(dir.path());
        let remote: Arc<dyn ExecutionBackend> = Arc::new(backend.clone());
        let reuse = RetrieveOptions::default().check_exists(true);

        assert!(!cache.object_exists_locally(&token, &id));
        let first = cache.retrieve(Arc::clone(&remote), &token, &id, reuse).await.unwrap();
        let second = cache.retrieve(Arc::clone(&remote), &token, &id, reuse).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("session-a").join(id.as_str()));
        assert!(cache.object_exists_locally(&token, &id));
        assert_eq!(backend.fetch_count(&id), 1);
    }

    #[tokio::test]
    async fn test_default_and_forced_retrievals_fetch_again() {
        let (dir, backend, id, token) = setup().await;
        let cache = WorkerObjectCache::new(dir.path());
        let remote: Arc<dyn ExecutionBackend> = Arc::new(backend.clone());

        cache.retrieve(Arc::clone(&remote), &token, &id, RetrieveOptions::default()).await.unwrap();
        cache.retrieve(Arc::clone(&remote), &token, &id, RetrieveOptions::default()).await.unwrap();
        let forced = RetrieveOptions::default().check_exists(true).force_retrieve(true);
        cache.retrieve(Arc::clone(&remote), &token, &id, forced).await.unwrap();

        assert_eq!(backend.fetch_count(&id), 3);
    }

    #[tokio::test]
    async fn test_vanished_file_is_fetched_once_then_reported() {
        let (dir, backend, id, token) = setup().await;
        let cache = WorkerObjectCache::new(dir.path());
        let remote: Arc<dyn ExecutionBackend> = Arc::new(backend.clone());
        let reuse = RetrieveOptions::default().check_exists(true);

        let path = cache.retrieve(Arc::clone(&remote), &token, &id, reuse).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(!cache.object_exists_locally(&token, &id));

        let again = cache.retrieve(Arc::clone(&remote), &token, &id, reuse).await.unwrap();
        assert!(again.is_file());
        assert_eq!(backend.fetch_count(&id), 2);

        std::fs::remove_file(&again).unwrap();
        let err = cache.retrieve(Arc::clone(&remote), &token, &id, reuse).await.unwrap_err();
        assert!(matches!(err, ArmadaError::Consistency { .. }));

        let repaired = reuse.force_retrieve(true);
        assert!(cache.retrieve(remote, &token, &id, repaired).await.unwrap().is_file());
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_object_absent() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WorkerObjectCache::new(dir.path());
        let remote: Arc<dyn ExecutionBackend> = Arc::new(InMemoryBackend::new());
        let token = SessionToken::new("session-a");
        let missing = ResultId::new("blob-missing");

        let err = cache
            .retrieve(remote, &token, &missing, RetrieveOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ArmadaError::Retrieval { .. }));
        assert_eq!(cache.status(&token, &missing), ObjectStatus::Absent);
    }

    #[tokio::test]
    async fn test_joined_failure_names_the_object_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = WorkerObjectCache::new(dir.path());
        let gated = GatedFetch::closed(InMemoryBackend::new());
        let remote: Arc<dyn ExecutionBackend> = Arc::new(gated.clone());
        let token = SessionToken::new("session-a");
        let missing = ResultId::new("blob-missing");

        let mut retrievals = Box::pin(futures::future::join_all((0..3).map(|_| {
            cache.retrieve(Arc::clone(&remote), &token, &missing, RetrieveOptions::default())
        })));
        assert!(futures::poll!(&mut retrievals).is_pending());
        gated.gate.add_permits(1);

        for outcome in retrievals.await {
            let message = outcome.unwrap_err().to_string();
            assert_eq!(message.matches("Retrieval of").count(), 1, "{message}");
            assert_eq!(message.matches("blob-missing").count(), 2, "{message}");
        }
    }
}
