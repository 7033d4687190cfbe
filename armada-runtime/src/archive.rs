//! Packing materialized content for upload and placing it on workers.
//!
//! Directories travel as one deflated zip archive with `/`-separated entry
//! names; files travel as their raw bytes.

use crate::cache::{publish_atomically, staging_path};
use armada_core::digest::directory_files;
use armada_core::{ArmadaError, MaterializeKind, Result};
use bytes::Bytes;
use std::fs::File;
use std::io::{self, Cursor};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Bytes to upload for a materialized `source`.
pub(crate) async fn pack(source: &Path, kind: MaterializeKind) -> Result<Bytes> {
    match kind {
        MaterializeKind::File => Ok(Bytes::from(tokio::fs::read(source).await?)),
        MaterializeKind::Directory => {
            let source = source.to_path_buf();
            tokio::task::spawn_blocking(move || zip_directory(&source))
                .await
                .map_err(|e| ArmadaError::Upload(format!("archiving task failed: {e}")))?
        }
    }
}

fn zip_directory(root: &Path) -> Result<Bytes> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (relative, path) in directory_files(root)? {
        zip.start_file(relative.as_str(), options).map_err(upload_error)?;
        let mut file = File::open(&path)?;
        io::copy(&mut file, &mut zip)?;
    }

    let cursor = zip.finish().map_err(upload_error)?;
    Ok(Bytes::from(cursor.into_inner()))
}

fn upload_error(err: zip::result::ZipError) -> ArmadaError {
    ArmadaError::Upload(format!("failed to archive directory: {err}"))
}

/// Extract the archive at `archive` into `target`, replacing what was there.
async fn unpack_directory(archive: &Path, target: &Path) -> Result<()> {
    let archive = archive.to_path_buf();
    let target = target.to_path_buf();
    tokio::task::spawn_blocking(move || extract_into(&archive, &target))
        .await
        .map_err(|e| ArmadaError::Backend(format!("extraction task failed: {e}")))?
}

fn extract_into(archive: &Path, target: &Path) -> Result<()> {
    let staging = staging_path(target);
    let mut zip = ZipArchive::new(File::open(archive)?).map_err(|e| extract_error(target, e))?;
    std::fs::create_dir_all(&staging)?;
    zip.extract(&staging).map_err(|e| extract_error(target, e))?;

    if target.exists() {
        std::fs::remove_dir_all(target)?;
    } else if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(&staging, target)?;
    Ok(())
}

fn extract_error(target: &Path, err: zip::result::ZipError) -> ArmadaError {
    ArmadaError::Argument(format!("cannot extract into {}: {err}", target.display()))
}

/// Copy a fetched file to `target`.
async fn place_file(cached: &Path, target: &Path) -> Result<()> {
    let bytes = tokio::fs::read(cached).await?;
    publish_atomically(target, &bytes).await?;
    Ok(())
}

/// Place a fetched materialization at its worker path.
///
/// Callers serialize placements at one `target`; see
/// [`PlacementCache`](crate::cache::PlacementCache).
pub(crate) async fn place(cached: &Path, target: &Path, kind: MaterializeKind) -> Result<()> {
    match kind {
        MaterializeKind::File => place_file(cached, target).await,
        MaterializeKind::Directory => unpack_directory(cached, target).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("nested/b.txt"), b"beta").unwrap();
        fs::write(root.join("nested/deeper/c.bin"), [0u8, 1, 2, 3]).unwrap();
    }

    #[tokio::test]
    async fn test_directory_survives_pack_and_unpack() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        sample_tree(&source);

        let archive = pack(&source, MaterializeKind::Directory).await.unwrap();
        let archive_path = dir.path().join("archive.zip");
        fs::write(&archive_path, &archive).unwrap();

        let target = dir.path().join("worker").join("data");
        place(&archive_path, &target, MaterializeKind::Directory).await.unwrap();

        assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(target.join("nested/b.txt")).unwrap(), b"beta");
        assert_eq!(fs::read(target.join("nested/deeper/c.bin")).unwrap(), [0u8, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unpack_replaces_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        sample_tree(&source);
        let archive_path = dir.path().join("archive.zip");
        fs::write(&archive_path, pack(&source, MaterializeKind::Directory).await.unwrap()).unwrap();

        let target = dir.path().join("data");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("stale.txt"), b"old").unwrap();

        unpack_directory(&archive_path, &target).await.unwrap();
        assert!(!target.join("stale.txt").exists());
        assert!(target.join("a.txt").is_file());
    }

    #[tokio::test]
    async fn test_file_is_packed_verbatim_and_placed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("weights.bin");
        fs::write(&source, b"raw-bytes").unwrap();

        let bytes = pack(&source, MaterializeKind::File).await.unwrap();
        assert_eq!(bytes.as_ref(), b"raw-bytes");

        let target = dir.path().join("worker/weights.bin");
        place(&source, &target, MaterializeKind::File).await.unwrap();
        assert_eq!(fs::read(target).unwrap(), b"raw-bytes");
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("broken.zip");
        fs::write(&archive_path, b"definitely not a zip").unwrap();

        let err = unpack_directory(&archive_path, &dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err, ArmadaError::Argument(_)));
    }
}
