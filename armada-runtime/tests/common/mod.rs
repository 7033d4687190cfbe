#![allow(dead_code)]

use armada_runtime::prelude::*;
use std::num::NonZeroUsize;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;

pub const POLL: Duration = Duration::from_millis(2);
pub const DEADLINE: Duration = Duration::from_secs(20);

/// A backend, a cache directory and a session that polls quickly.
pub struct Harness {
    pub backend: InMemoryBackend,
    pub session: Session<JsonCodec>,
    pub cache_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let cache_dir = tempfile::tempdir().unwrap();
        let backend = InMemoryBackend::new();
        let config = SessionConfig::default()
            .with_cache_root(cache_dir.path())
            .with_poll_interval(POLL)
            .with_wait_timeout(Some(DEADLINE));
        let session = Session::open(backend.clone(), JsonCodec, config);
        Self {
            backend,
            session,
            cache_dir,
        }
    }

    pub fn worker(&self, registry: TaskRegistry<JsonCodec>, slots: usize) -> PooledWorker<InMemoryBackend, JsonCodec> {
        PooledWorker::new("worker-1", self.backend.clone(), registry, JsonCodec)
            .with_max_concurrency(NonZeroUsize::new(slots).unwrap())
            .with_poll_interval(POLL)
            .with_session_config(self.session.config().clone())
    }

    pub fn spawn_worker(&self, registry: TaskRegistry<JsonCodec>, slots: usize) -> JoinHandle<anyhow::Result<()>> {
        self.worker(registry, slots).spawn()
    }
}
