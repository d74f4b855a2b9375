//! Watcher-push sub-loop: for each accepted filesystem change, hash
//! the current content (or `None` for a deletion) and post it. Push
//! failures are logged and not retried — either the next pull tick or a
//! subsequent local change supersedes a dropped push.

use std::path::PathBuf;
use std::sync::Arc;

use cloud_client::CloudApi;
use cloud_client::FileChange;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::watcher::WatchEvent;

pub async fn run_push_loop(
    client: Arc<dyn CloudApi>,
    session_id: String,
    project_root: PathBuf,
    mut events: mpsc::Receiver<WatchEvent>,
    ctx: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = ctx.cancelled() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            return;
        };

        let absolute = project_root.join(&event.relative_path);
        let hash = match relay_utils::hash::hash_file(&absolute).await {
            Ok(hash) => hash,
            Err(err) => {
                tracing::warn!(path = %event.relative_path, error = %err, "failed to hash changed file, skipping push");
                continue;
            }
        };

        let change = FileChange {
            path: event.relative_path.clone(),
            deleted: hash.is_none(),
            content_hash: hash,
            contents_base64: None,
        };

        if let Err(err) = client.push_change(&session_id, &change).await {
            tracing::warn!(path = %event.relative_path, error = %err, "pushChange failed, not retrying");
        }
    }
}
