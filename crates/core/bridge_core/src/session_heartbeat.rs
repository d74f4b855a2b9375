//! Bridge session heartbeat sub-loop: posts presence `online` on a
//! cadence, and best-effort `offline` once on cancellation.

use std::sync::Arc;
use std::time::Duration;

use cloud_client::BridgeSession;
use cloud_client::CloudApi;
use relay_utils::sleep::abort_aware_sleep;
use relay_utils::sleep::SleepOutcome;
use tokio_util::sync::CancellationToken;

pub async fn run_session_heartbeat_loop(
    client: Arc<dyn CloudApi>,
    session_id: String,
    project_id: String,
    interval: Duration,
    ctx: CancellationToken,
) {
    loop {
        let session = BridgeSession {
            session_id: session_id.clone(),
            project_id: project_id.clone(),
            is_present: true,
            ignore_patterns: Vec::new(),
        };
        if let Err(err) = client.update_bridge_session(&session).await {
            tracing::warn!(error = %err, "bridge session heartbeat failed, continuing");
        }

        if abort_aware_sleep(interval, &ctx).await == SleepOutcome::Cancelled {
            break;
        }
    }

    let offline = BridgeSession {
        session_id,
        project_id,
        is_present: false,
        ignore_patterns: Vec::new(),
    };
    if let Err(err) = client.update_bridge_session(&offline).await {
        tracing::warn!(error = %err, "best-effort offline bridge session update failed");
    }
}
