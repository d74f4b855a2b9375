//! The outbound poller: fetch, deliver, ack, with the
//! deliver-then-ack race guarded by the `deliveredIds` cache and at-most-once
//! delivery as the headline invariant.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use channel_plugin::ChannelPlugin;
use cloud_client::CloudApi;
use cloud_client::CloudError;
use cloud_client::DeliveryResult;
use cloud_client::OutboundMessage;
use relay_config::OutboundPolicy;
use relay_utils::sleep::abort_aware_sleep;
use relay_utils::sleep::SleepOutcome;
use tokio_util::sync::CancellationToken;

use crate::delivered_ids::DeliveredIds;

/// Why the poller stopped. `DeviceTokenExpired` is fatal to the owning
/// supervisor (it is reclassified as `logged-out`); `Cancelled` is a clean
/// shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerOutcome {
    Cancelled,
    DeviceTokenExpired,
}

fn skip_reack() -> DeliveryResult {
    DeliveryResult {
        success: true,
        platform_message_id: None,
        error: None,
        retryable: None,
        duration_ms: 0,
    }
}

/// Runs until `ctx` cancels or `pollOutbound` surfaces
/// [`CloudError::DeviceTokenExpired`].
pub async fn start_outbound_poller(
    client: Arc<dyn CloudApi>,
    policy: OutboundPolicy,
    plugin: Arc<dyn ChannelPlugin>,
    ctx: CancellationToken,
) -> PollerOutcome {
    let mut delivered = DeliveredIds::new();

    loop {
        match client.poll_outbound(policy.max_per_poll).await {
            Ok(messages) => {
                // `maxPerPoll` is a server-side contract; the client-side
                // take() here is a defensive assertion, not the primary
                // enforcement point.
                for message in messages.into_iter().take(policy.max_per_poll as usize) {
                    process_one(client.as_ref(), plugin.as_ref(), &mut delivered, message).await;
                    if ctx.is_cancelled() {
                        return PollerOutcome::Cancelled;
                    }
                }
            }
            Err(CloudError::DeviceTokenExpired) => return PollerOutcome::DeviceTokenExpired,
            Err(err) => {
                tracing::warn!(error = %err, "pollOutbound failed, continuing");
            }
        }

        if abort_aware_sleep(Duration::from_secs(policy.poll_interval_secs), &ctx).await
            == SleepOutcome::Cancelled
        {
            return PollerOutcome::Cancelled;
        }
    }
}

/// Processes exactly one queued message per the per-message delivery contract.
/// `deliver` is invoked at most once for `message.id`, regardless of
/// whether its ack succeeds.
async fn process_one(
    client: &dyn CloudApi,
    plugin: &dyn ChannelPlugin,
    delivered: &mut DeliveredIds,
    message: OutboundMessage,
) {
    if delivered.contains(&message.id) {
        tracing::debug!(id = %message.id, "already delivered, re-acking without re-delivering");
        ack_best_effort(client, &message.id, &skip_reack()).await;
        return;
    }

    let t0 = Instant::now();
    let outcome = plugin.deliver(&message.envelope).await;
    let duration_ms = t0.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(result) if result.success => {
            // Recorded before acking, so a subsequent re-queue of the same
            // id (because this ack itself fails) is recognised as already
            // delivered rather than delivered a second time.
            delivered.insert(message.id.clone());
            result
        }
        Ok(result) => result,
        Err(err) => DeliveryResult::failure(err.to_string(), true, duration_ms),
    };

    ack_best_effort(client, &message.id, &result).await;
}

async fn ack_best_effort(client: &dyn CloudApi, id: &str, result: &DeliveryResult) {
    if let Err(err) = client.ack_outbound(id, result).await {
        tracing::warn!(id = %id, error = %err, "ackOutbound failed");
    }
}
