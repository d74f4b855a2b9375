//! Atomic, permission-pinned file writes.
//!
//! Every file the daemon persists (`config.json`, `context.json`, pid
//! files, credential files) is written to a temporary file in the same
//! directory and renamed into place, so a reader never observes a partial
//! write. Mode bits are set on the tempfile before the rename, never on the
//! destination afterwards.

use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("parent directory of {path:?} does not exist")]
    NoParentDirectory { path: std::path::PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Writes `contents` to `dest` atomically, with file mode `mode`.
///
/// Used for `config.json`, `context.json`, `relay.pid`, `bridge.pid` (mode
/// 0600) and credential files under `<channel>/` (mode 0600, in a 0700
/// directory).
pub async fn atomic_write(
    dest: impl AsRef<Path>,
    contents: &[u8],
    mode: u32,
) -> Result<(), FsError> {
    let dest = dest.as_ref();
    let parent = dest.parent().ok_or_else(|| FsError::NoParentDirectory {
        path: dest.to_path_buf(),
    })?;

    let mut tempfile = tempfile::Builder::new()
        .permissions(std::fs::Permissions::from_mode(mode))
        .tempfile_in(parent)?;

    use std::io::Write;
    tempfile.write_all(contents)?;
    tempfile.as_file().sync_all()?;

    tempfile
        .persist(dest)
        .map_err(|persist_err| FsError::Io(persist_err.error))?;

    Ok(())
}

/// Ensures `dir` exists with the given mode, creating parents as needed.
pub fn ensure_directory(dir: impl AsRef<Path>, mode: u32) -> Result<(), FsError> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Reads a file's contents, treating a missing file as `Ok(None)`.
pub async fn read_optional(path: impl AsRef<Path>) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path.as_ref()).await {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn atomic_write_creates_file_with_mode() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("config.json");

        atomic_write(&dest, b"{}", 0o600).await.unwrap();

        let contents = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(contents, b"{}");

        let mode = std::fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[tokio::test]
    async fn atomic_write_overwrites_existing_file() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("config.json");
        tokio::fs::write(&dest, b"old").await.unwrap();

        atomic_write(&dest, b"new", 0o600).await.unwrap();

        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn read_optional_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing");
        assert_eq!(read_optional(&path).await.unwrap(), None);
    }
}
