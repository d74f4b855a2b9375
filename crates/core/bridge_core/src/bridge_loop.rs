//! Assembles the bridge's four concurrent sub-loops under one
//! cancellation scope: session heartbeat, watcher push, pull poll, and
//! build-request poll.

use std::path::PathBuf;
use std::sync::Arc;

use cloud_client::CloudApi;
use ignore_matcher::IgnoreMatcher;
use relay_config::BridgePolicy;
use tokio_util::sync::CancellationToken;

use crate::build_executor::run_build;
use crate::pull::run_pull_loop;
use crate::push::run_push_loop;
use crate::session_heartbeat::run_session_heartbeat_loop;
use crate::watcher::ProjectWatcher;
use crate::watcher::Suppressions;
use crate::watcher::WatcherError;

pub struct BridgeLoopConfig {
    pub client: Arc<dyn CloudApi>,
    pub session_id: String,
    pub project_id: String,
    pub project_root: PathBuf,
    pub ignore: Arc<IgnoreMatcher>,
    pub policy: BridgePolicy,
}

/// Runs the bridge's four sub-loops concurrently until `root` cancels,
/// then awaits all of them before returning (the supervisor's "await all
/// sub-loops before exiting" cancellation contract applied to the bridge).
pub async fn run_bridge_loop(config: BridgeLoopConfig, root: CancellationToken) -> Result<(), WatcherError> {
    let suppressions = Suppressions::new();
    let (_watcher, watch_events) =
        ProjectWatcher::start(config.project_root.clone(), config.ignore, suppressions.clone())?;

    let heartbeat = tokio::spawn(run_session_heartbeat_loop(
        config.client.clone(),
        config.session_id.clone(),
        config.project_id.clone(),
        std::time::Duration::from_secs(config.policy.heartbeat_interval_secs),
        root.clone(),
    ));

    let push = tokio::spawn(run_push_loop(
        config.client.clone(),
        config.session_id.clone(),
        config.project_root.clone(),
        watch_events,
        root.clone(),
    ));

    let pull = tokio::spawn(run_pull_loop(
        config.client.clone(),
        config.session_id.clone(),
        config.project_root.clone(),
        suppressions,
        std::time::Duration::from_secs(config.policy.pull_poll_interval_secs),
        root.clone(),
    ));

    let build_poll = tokio::spawn(run_build_poll_loop(
        config.client.clone(),
        config.project_id.clone(),
        config.project_root.clone(),
        std::time::Duration::from_secs(config.policy.build_poll_interval_secs),
        root.clone(),
    ));

    root.cancelled().await;

    let _ = tokio::join!(heartbeat, push, pull, build_poll);
    Ok(())
}

async fn run_build_poll_loop(
    client: Arc<dyn CloudApi>,
    project_id: String,
    project_root: PathBuf,
    poll_interval: std::time::Duration,
    ctx: CancellationToken,
) {
    use relay_utils::sleep::abort_aware_sleep;
    use relay_utils::sleep::SleepOutcome;

    loop {
        match client.query_pending_builds(&project_id).await {
            Ok(builds) => {
                for build in builds {
                    run_build(client.as_ref(), &project_root, &build).await;
                    if ctx.is_cancelled() {
                        return;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "queryPendingBuilds failed, continuing");
            }
        }

        if abort_aware_sleep(poll_interval, &ctx).await == SleepOutcome::Cancelled {
            return;
        }
    }
}
