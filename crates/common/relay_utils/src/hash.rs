//! Content hashing for the bridge's file-change watcher.
//!
//! `hashFile` on a path that no longer exists yields `None` rather than an
//! error: a file can legitimately vanish between the watcher noticing a
//! change and this function reading it, and a delete is itself a valid
//! `FileChangeEvent`.

use std::path::Path;

/// SHA-256 hex digest of `contents`.
pub fn hash_content(contents: &[u8]) -> String {
    sha256::digest(contents)
}

/// SHA-256 hex digest of the file at `path`, or `None` if it does not exist.
pub async fn hash_file(path: impl AsRef<Path>) -> std::io::Result<Option<String>> {
    match tokio::fs::read(path.as_ref()).await {
        Ok(contents) => Ok(Some(hash_content(&contents))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn hash_file_matches_hash_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        tokio::fs::write(&path, b"hello relay").await.unwrap();

        let file_hash = hash_file(&path).await.unwrap().unwrap();
        let content_hash = hash_content(b"hello relay");

        assert_eq!(file_hash, content_hash);
    }

    #[tokio::test]
    async fn hash_file_missing_is_none_not_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.txt");

        assert_eq!(hash_file(&path).await.unwrap(), None);
    }
}
