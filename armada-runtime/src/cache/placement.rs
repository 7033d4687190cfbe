use super::lock;
use armada_core::{ContentDigest, Result};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

type Slot = Arc<tokio::sync::Mutex<Option<ContentDigest>>>;

/// Worker-wide record of which content sits at each materialization path.
///
/// Placements at one path are serialized, and content that is already in
/// place is not written again, so tasks sharing a materialized directory
/// never replace it under each other.
#[derive(Debug, Default)]
pub struct PlacementCache {
    entries: Mutex<HashMap<PathBuf, Slot>>,
}

impl PlacementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `place` unless `digest` is already at `target`. Returns whether it ran.
    ///
    /// A failed placement forgets what the path held, so the next task retries.
    pub async fn place_with<F, Fut>(&self, target: &Path, digest: &ContentDigest, place: F) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let slot = {
            let mut entries = lock(&self.entries);
            Arc::clone(entries.entry(target.to_path_buf()).or_default())
        };

        let mut placed = slot.lock().await;
        if placed.as_ref() == Some(digest) && target.exists() {
            tracing::debug!(path = %target.display(), digest = %digest, "Materialization already in place");
            return Ok(false);
        }

        *placed = None;
        place().await?;
        tracing::debug!(path = %target.display(), digest = %digest, "Placed materialization");
        *placed = Some(digest.clone());
        Ok(true)
    }

    /// The content at `target`, unless a placement there is in progress.
    pub fn placed(&self, target: &Path) -> Option<ContentDigest> {
        let slot = lock(&self.entries).get(target).cloned()?;
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }
}
