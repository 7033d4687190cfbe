//! Files and directories that a task expects to find on the worker.

use crate::digest::{digest_directory, digest_file};
use crate::error::{ArmadaError, Result};
use crate::primitives::{ContentDigest, ResultId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Whether a record covers a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaterializeKind {
    File,
    /// Uploaded as a single zip archive, extracted on the worker.
    Directory,
}

/// A local path declared for materialization on workers.
///
/// Two records with the same `content_digest` are interchangeable: uploading one
/// makes the other reuse the same remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Materialize {
    pub source_path: PathBuf,
    /// Where the worker places the content before the task body runs.
    pub worker_path: PathBuf,
    pub content_digest: ContentDigest,
    pub kind: MaterializeKind,
    /// Set once the content has been uploaded.
    pub result_id: Option<ResultId>,
    pub uploaded: bool,
}

impl Materialize {
    pub fn is_directory(&self) -> bool {
        self.kind == MaterializeKind::Directory
    }

    /// The remote object holding the content, if it was uploaded.
    pub fn uploaded_id(&self) -> Option<&ResultId> {
        self.result_id.as_ref().filter(|_| self.uploaded)
    }

    /// Record a successful upload.
    pub fn mark_uploaded(&mut self, result_id: ResultId) {
        self.result_id = Some(result_id);
        self.uploaded = true;
    }
}

/// Hash `source` and describe where it should appear on the worker.
///
/// Nothing is uploaded here; see the session's `upload_materialize`.
pub fn materialize(source: impl AsRef<Path>, worker_path: impl Into<PathBuf>) -> Result<Materialize> {
    let source = source.as_ref();
    let metadata = std::fs::metadata(source).map_err(|e| {
        ArmadaError::Argument(format!("cannot materialize {}: {e}", source.display()))
    })?;
    let (kind, content_digest) = if metadata.is_dir() {
        (MaterializeKind::Directory, digest_directory(source)?)
    } else {
        (MaterializeKind::File, digest_file(source)?)
    };

    Ok(Materialize {
        source_path: source.to_path_buf(),
        worker_path: worker_path.into(),
        content_digest,
        kind,
        result_id: None,
        uploaded: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_materialize_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("config.txt");
        fs::write(&config, "debug=true\n").unwrap();

        let record = materialize(&config, "/tmp/worker_config.txt").unwrap();
        assert_eq!(record.kind, MaterializeKind::File);
        assert_eq!(record.source_path, config);
        assert_eq!(record.worker_path, PathBuf::from("/tmp/worker_config.txt"));
        assert_eq!(record.content_digest.as_str().len(), 64);
        assert!(!record.uploaded);
        assert!(record.uploaded_id().is_none());
    }

    #[test]
    fn test_materialize_directory() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = dir.path().join("dataset");
        fs::create_dir_all(&dataset).unwrap();
        fs::write(dataset.join("data_0.txt"), "Sample data file 0\n").unwrap();

        let record = materialize(&dataset, "/tmp/worker_dataset").unwrap();
        assert!(record.is_directory());
    }

    #[test]
    fn test_equal_content_gives_equal_digest_across_paths() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("config.txt");
        let b = dir.path().join("config_copy.txt");
        fs::write(&a, "max_workers=10\n").unwrap();
        fs::write(&b, "max_workers=10\n").unwrap();

        let first = materialize(&a, "/tmp/a").unwrap();
        let second = materialize(&b, "/tmp/b").unwrap();
        assert_eq!(first.content_digest, second.content_digest);
        assert_ne!(first, second);
    }

    #[test]
    fn test_missing_source_is_an_argument_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = materialize(dir.path().join("nope"), "/tmp/nope").unwrap_err();
        assert!(matches!(err, ArmadaError::Argument(_)));
    }

    #[test]
    fn test_mark_uploaded() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, "x").unwrap();
        let mut record = materialize(&file, "/tmp/f").unwrap();
        record.mark_uploaded(ResultId::new("blob-1"));
        assert_eq!(record.uploaded_id(), Some(&ResultId::new("blob-1")));
    }
}
