//! Filesystem operations
//!
//! Directory, file, checksum and symlink helpers mapping I/O failures to
//! [`FilesystemError`].

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    std::fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Remove a directory and all its contents
pub fn remove_dir_all(path: &Path) -> Result<(), FilesystemError> {
    if path.exists() {
        std::fs::remove_dir_all(path).map_err(|e| FilesystemError::RemoveDir {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    Ok(())
}

/// Write content to a file through a temporary file in the same directory
///
/// Readers see either the old content or the new content, never a partial
/// write.
pub fn write_file_atomic(path: &Path, content: &str) -> Result<(), FilesystemError> {
    let write_err = |error: String| FilesystemError::WriteFile {
        path: path.to_path_buf(),
        error,
    };
    let parent = path
        .parent()
        .ok_or_else(|| write_err("path has no parent directory".to_string()))?;
    create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| write_err(e.to_string()))?;
    tmp.write_all(content.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| write_err(e.to_string()))?;
    tmp.persist(path).map_err(|e| write_err(e.error.to_string()))?;
    Ok(())
}

/// SHA-256 of a file's content, lowercase hex
pub async fn sha256_file(path: &Path) -> Result<String, FilesystemError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|e| FilesystemError::ReadFile {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
    Ok(compute_checksum(&content))
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Point `link` at `target`, replacing a link that points elsewhere
///
/// Returns `true` if the link was created or changed. A regular file or
/// directory at `link` is left alone and reported as an error.
#[cfg(unix)]
pub fn ensure_symlink(link: &Path, target: &Path) -> Result<bool, FilesystemError> {
    let link_err = |error: String| FilesystemError::Symlink {
        link: link.to_path_buf(),
        target: target.to_path_buf(),
        error,
    };

    match std::fs::symlink_metadata(link) {
        Ok(meta) if meta.file_type().is_symlink() => {
            let current = std::fs::read_link(link).map_err(|e| link_err(e.to_string()))?;
            if current == target {
                return Ok(false);
            }
            std::fs::remove_file(link).map_err(|e| link_err(e.to_string()))?;
        }
        Ok(_) => return Err(link_err("a non-link file is in the way".to_string())),
        Err(_) => {}
    }

    if let Some(parent) = link.parent() {
        create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(target, link).map_err(|e| link_err(e.to_string()))?;
    Ok(true)
}
