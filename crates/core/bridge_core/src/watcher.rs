//! A project-root filesystem watcher, built against plain
//! `notify::RecommendedWatcher` rather than a debounced watcher: the
//! push sub-loop only needs "something in this file changed", and the
//! ignore matcher already collapses most of what a debouncer would.
//!
//! Runs the watcher on its own background thread (notify's callback is
//! synchronous) and forwards accepted paths into a `tokio::sync::mpsc`
//! channel the bridge loop can `.recv().await` on.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use ignore_matcher::IgnoreMatcher;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Ignore(#[from] ignore_matcher::IgnoreError),
}

/// One accepted filesystem change, relative-path-and-forward-slashed,
/// ready for the push sub-loop to hash and post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub relative_path: String,
}

/// Paths the pull-poll loop is currently writing to, so the watcher's own
/// write doesn't get echoed back as a change and pushed right back to the
/// server it just came from.
#[derive(Default, Clone)]
pub struct Suppressions {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl Suppressions {
    pub fn new() -> Self {
        Suppressions::default()
    }

    /// Must be called before the pull loop starts writing the file.
    pub fn suppress(&self, relative_path: &str) {
        self.inner.lock().unwrap().insert(relative_path.to_string());
    }

    /// Must be called after the write completes, per the ordering
    /// guarantee that suppression brackets the write exactly.
    pub fn unsuppress(&self, relative_path: &str) {
        self.inner.lock().unwrap().remove(relative_path);
    }

    fn is_suppressed(&self, relative_path: &str) -> bool {
        self.inner.lock().unwrap().contains(relative_path)
    }
}

pub struct ProjectWatcher {
    // Held only to keep the underlying OS watch alive for the process
    // lifetime; never read directly.
    _watcher: RecommendedWatcher,
}

impl ProjectWatcher {
    /// Spawns the background watcher thread and returns the receiving end
    /// of its event channel alongside the handle that keeps it alive.
    pub fn start(
        root: PathBuf,
        ignore: Arc<IgnoreMatcher>,
        suppressions: Suppressions,
    ) -> Result<(ProjectWatcher, mpsc::Receiver<WatchEvent>), WatcherError> {
        let (tx, rx) = mpsc::channel(1024);
        let root_for_events = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in event.paths {
                let Some(relative) = relativize(&root_for_events, &path) else {
                    continue;
                };
                if ignore.is_ignored(&relative) || suppressions.is_suppressed(&relative) {
                    continue;
                }
                // A full channel means the push loop has fallen far behind;
                // dropping here is acceptable since a subsequent change to
                // the same path (or the pull loop) will supersede it.
                let _ = tx.try_send(WatchEvent {
                    relative_path: relative,
                });
            }
        })?;

        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok((ProjectWatcher { _watcher: watcher }, rx))
    }
}

fn relativize(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    Some(ignore_matcher::normalize(&relative.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relativize_normalizes_to_forward_slashes() {
        let root = Path::new("/project");
        let path = Path::new("/project/src/main.rs");
        assert_eq!(relativize(root, path), Some("src/main.rs".to_string()));
    }

    #[test]
    fn relativize_outside_root_is_none() {
        let root = Path::new("/project");
        let path = Path::new("/other/file.rs");
        assert_eq!(relativize(root, path), None);
    }

    #[test]
    fn suppression_brackets_a_path() {
        let suppressions = Suppressions::new();
        assert!(!suppressions.is_suppressed("a.txt"));
        suppressions.suppress("a.txt");
        assert!(suppressions.is_suppressed("a.txt"));
        suppressions.unsuppress("a.txt");
        assert!(!suppressions.is_suppressed("a.txt"));
    }
}
