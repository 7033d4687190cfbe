use super::lock;
use armada_core::{ContentDigest, ResultId, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

type Slot = Arc<tokio::sync::Mutex<Option<ResultId>>>;

/// Per-session map from content digest to the remote object holding that content.
///
/// Uploads for the same digest are serialized; uploads for different digests
/// run concurrently.
#[derive(Debug, Default)]
pub struct MaterializationCache {
    entries: Mutex<HashMap<ContentDigest, Slot>>,
}

impl MaterializationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the known object for `digest`, or run `upload` and remember its result.
    ///
    /// With `force`, `upload` always runs and replaces the remembered object.
    /// A failed upload leaves the previous entry untouched.
    pub async fn get_or_upload<F, Fut>(
        &self,
        digest: &ContentDigest,
        force: bool,
        upload: F,
    ) -> Result<ResultId>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ResultId>>,
    {
        let slot = {
            let mut entries = lock(&self.entries);
            Arc::clone(entries.entry(digest.clone()).or_default())
        };

        let mut guard = slot.lock().await;
        if !force {
            if let Some(id) = guard.as_ref() {
                tracing::debug!(digest = %digest, result_id = %id, "Reusing uploaded content");
                return Ok(id.clone());
            }
        }

        let id = upload().await?;
        tracing::debug!(digest = %digest, result_id = %id, force, "Uploaded content");
        *guard = Some(id.clone());
        Ok(id)
    }

    /// The remembered object for `digest`, unless an upload for it is in flight.
    pub fn get(&self, digest: &ContentDigest) -> Option<ResultId> {
        let slot = lock(&self.entries).get(digest).cloned()?;
        let guard = slot.try_lock().ok()?;
        guard.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entry. In-flight uploads finish but are not remembered.
    pub fn clear(&self) {
        lock(&self.entries).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn digest(hex: &str) -> ContentDigest {
        ContentDigest::from_hex(hex)
    }

    #[tokio::test]
    async fn test_second_request_reuses_first_upload() {
        let cache = MaterializationCache::new();
        let uploads = AtomicUsize::new(0);

        for _ in 0..3 {
            let id = cache
                .get_or_upload(&digest("aa"), false, || async {
                    uploads.fetch_add(1, Ordering::SeqCst);
                    Ok(ResultId::new("blob-1"))
                })
                .await
                .unwrap();
            assert_eq!(id.as_str(), "blob-1");
        }
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get(&digest("aa")), Some(ResultId::new("blob-1")));
    }

    #[tokio::test]
    async fn test_force_replaces_entry() {
        let cache = MaterializationCache::new();
        cache
            .get_or_upload(&digest("aa"), false, || async { Ok(ResultId::new("blob-1")) })
            .await
            .unwrap();
        let id = cache
            .get_or_upload(&digest("aa"), true, || async { Ok(ResultId::new("blob-2")) })
            .await
            .unwrap();
        assert_eq!(id.as_str(), "blob-2");
        assert_eq!(cache.get(&digest("aa")), Some(ResultId::new("blob-2")));
    }

    #[tokio::test]
    async fn test_failed_upload_is_not_remembered() {
        let cache = MaterializationCache::new();
        let result = cache
            .get_or_upload(&digest("bb"), false, || async {
                Err(armada_core::ArmadaError::Upload("disk full".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.get(&digest("bb")), None);
    }

    #[tokio::test]
    async fn test_concurrent_requests_upload_once() {
        let cache = Arc::new(MaterializationCache::new());
        let uploads = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let uploads = Arc::clone(&uploads);
                tokio::spawn(async move {
                    cache
                        .get_or_upload(&digest("cc"), false, || async move {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            uploads.fetch_add(1, Ordering::SeqCst);
                            Ok(ResultId::new("blob-shared"))
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().as_str(), "blob-shared");
        }
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_forgets_entries() {
        let cache = MaterializationCache::new();
        cache
            .get_or_upload(&digest("dd"), false, || async { Ok(ResultId::new("blob-1")) })
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
