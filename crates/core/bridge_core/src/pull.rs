//! Pull-poll sub-loop: applies remote file changes to disk,
//! bracketing each write with a watcher suppression so the write is never
//! echoed back as a local change.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use cloud_client::CloudApi;
use cloud_client::FileChange;
use relay_utils::sleep::abort_aware_sleep;
use relay_utils::sleep::SleepOutcome;
use tokio_util::sync::CancellationToken;

use crate::watcher::Suppressions;

/// Runs until `ctx` cancels, applying every change `pullChanges` returns on
/// each tick before sleeping for `poll_interval`.
pub async fn run_pull_loop(
    client: Arc<dyn CloudApi>,
    session_id: String,
    project_root: std::path::PathBuf,
    suppressions: Suppressions,
    poll_interval: Duration,
    ctx: CancellationToken,
) {
    loop {
        match client.pull_changes(&session_id).await {
            Ok(changes) => {
                for change in changes {
                    apply_change(&project_root, &suppressions, &change).await;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "pullChanges failed, continuing");
            }
        }

        if abort_aware_sleep(poll_interval, &ctx).await == SleepOutcome::Cancelled {
            return;
        }
    }
}

async fn apply_change(project_root: &Path, suppressions: &Suppressions, change: &FileChange) {
    let relative = ignore_matcher::normalize(&change.path);
    let dest = project_root.join(&relative);

    suppressions.suppress(&relative);

    let result = if change.deleted {
        match tokio::fs::remove_file(&dest).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    } else {
        write_change(&dest, change).await
    };

    // The OS watcher delivers filesystem events from a separate thread,
    // asynchronously from this write: unsuppressing immediately risks
    // clearing the suppression before that event arrives, so this write's
    // own echo would reach `push.rs` as an unsuppressed local change. Yield
    // at least one tick first so the watcher has a chance to observe and
    // discard it under suppression.
    tokio::task::yield_now().await;
    suppressions.unsuppress(&relative);

    if let Err(err) = result {
        tracing::warn!(path = %relative, error = %err, "failed to apply pulled file change");
    }
}

async fn write_change(dest: &Path, change: &FileChange) -> Result<(), relay_utils::fs::FsError> {
    let Some(parent) = dest.parent() else {
        return Ok(());
    };
    relay_utils::fs::ensure_directory(parent, 0o700)?;

    let contents = change
        .contents_base64
        .as_deref()
        .map(|encoded| {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .unwrap_or_default()
        })
        .unwrap_or_default();

    relay_utils::fs::atomic_write(dest, &contents, 0o600).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_decoded_contents_and_brackets_suppression() {
        let dir = tempdir().unwrap();
        let suppressions = Suppressions::new();
        let change = FileChange {
            path: "src/main.rs".to_string(),
            content_hash: None,
            contents_base64: Some(base64::engine::general_purpose::STANDARD.encode(b"fn main() {}")),
            deleted: false,
        };

        apply_change(dir.path(), &suppressions, &change).await;

        let contents = tokio::fs::read(dir.path().join("src/main.rs")).await.unwrap();
        assert_eq!(contents, b"fn main() {}");
    }

    #[tokio::test]
    async fn deletes_file_for_deleted_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.txt");
        tokio::fs::write(&path, b"bye").await.unwrap();
        let suppressions = Suppressions::new();
        let change = FileChange {
            path: "gone.txt".to_string(),
            content_hash: None,
            contents_base64: None,
            deleted: true,
        };

        apply_change(dir.path(), &suppressions, &change).await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_file_deletion_is_not_an_error() {
        let dir = tempdir().unwrap();
        let suppressions = Suppressions::new();
        let change = FileChange {
            path: "never-existed.txt".to_string(),
            content_hash: None,
            contents_base64: None,
            deleted: true,
        };

        apply_change(dir.path(), &suppressions, &change).await;
    }
}
