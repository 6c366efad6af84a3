// src/sys/files.rs

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{NoProxyError, Result};

/// Reads a text file, treating a missing file as empty.
pub async fn read_or_empty(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(NoProxyError::io(path, e)),
    }
}

/// Writes `content` to `path` via a temp file in the same directory and an
/// atomic rename, so readers never observe a half-written file.
pub async fn write_atomic(path: &Path, content: String, mode: u32) -> Result<()> {
    let path = path.to_path_buf();
    let target = path.clone();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, content.as_bytes(), mode))
        .await
        .map_err(|e| NoProxyError::io(target, std::io::Error::other(e)))?
}

fn write_atomic_blocking(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let parent: PathBuf = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    std::fs::create_dir_all(&parent).map_err(|e| NoProxyError::io(&parent, e))?;

    let mut tmp = NamedTempFile::new_in(&parent).map_err(|e| NoProxyError::io(&parent, e))?;
    tmp.write_all(content).map_err(|e| NoProxyError::io(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| NoProxyError::io(tmp.path(), e))?;

    // NamedTempFile is created 0600; widen to the requested mode before it becomes visible.
    let perms = std::fs::Permissions::from_mode(mode);
    tmp.as_file()
        .set_permissions(perms)
        .map_err(|e| NoProxyError::io(tmp.path(), e))?;

    tmp.persist(path).map_err(|e| NoProxyError::io(path, e.error))?;
    Ok(())
}
