//! Content hashing for materialized files and directory trees.
//!
//! Digests only depend on content: a directory digest covers the relative path,
//! length and bytes of every regular file below it, visited in sorted path order.
//! Timestamps, permissions, empty directories and symlinks do not contribute.

use crate::primitives::ContentDigest;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Digest of a single file's bytes.
pub fn digest_file(path: &Path) -> io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(ContentDigest::from_hex(format!("{:x}", hasher.finalize())))
}

/// Digest of a directory tree.
pub fn digest_directory(root: &Path) -> io::Result<ContentDigest> {
    let mut hasher = Sha256::new();
    for (relative, path) in directory_files(root)? {
        let mut file = File::open(&path)?;
        let len = file.metadata()?.len();
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(len.to_le_bytes());
        io::copy(&mut file, &mut hasher)?;
    }
    Ok(ContentDigest::from_hex(format!("{:x}", hasher.finalize())))
}

/// Regular files below `root` as (`/`-separated relative path, absolute path),
/// sorted by relative path.
pub fn directory_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.into_path()));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}
