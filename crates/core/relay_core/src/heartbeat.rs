//! The heartbeat loop: presence + server-controlled interval
//! adoption, with every error logged and swallowed so a flaky cloud never
//! kills the loop.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use channel_plugin::ChannelPlugin;
use cloud_client::CloudApi;
use cloud_client::HeartbeatRequest;
use relay_config::HeartbeatPolicy;
use relay_utils::sleep::abort_aware_sleep;
use relay_utils::sleep::SleepOutcome;
use tokio_util::sync::CancellationToken;

/// Fires immediately, then on a cadence that adopts `heartbeatIntervalSeconds`
/// from the server's response whenever present, until `ctx` cancels.
///
/// `started_at` anchors the reported uptime; `on_heartbeat_ok` lets the
/// supervisor observe the first successful transition into `Online` so it
/// can reset its reconnect-attempt counter.
pub async fn start_heartbeat_loop(
    client: Arc<dyn CloudApi>,
    policy: HeartbeatPolicy,
    plugin: Arc<dyn ChannelPlugin>,
    started_at: Instant,
    on_heartbeat_ok: impl Fn() + Send + Sync,
    ctx: CancellationToken,
) {
    let mut interval = Duration::from_secs(policy.interval_secs);

    loop {
        let request = HeartbeatRequest {
            platform_status: plugin.get_status().await.as_str().to_string(),
            uptime_seconds: started_at.elapsed().as_secs(),
        };

        match client.heartbeat(request).await {
            Ok(response) => {
                on_heartbeat_ok();
                if let Some(seconds) = response.heartbeat_interval_seconds {
                    interval = Duration::from_secs(seconds);
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "heartbeat failed, continuing");
            }
        }

        if abort_aware_sleep(interval, &ctx).await == SleepOutcome::Cancelled {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use channel_plugin::Channel;
    use channel_plugin::InboundSink;
    use channel_plugin::PluginError;
    use channel_plugin::PluginStatus;
    use cloud_client::BridgeSession;
    use cloud_client::BuildRecordUpdate;
    use cloud_client::ChatEgressEnvelope;
    use cloud_client::ChatIngressEnvelope;
    use cloud_client::CloudError;
    use cloud_client::DeliveryResult;
    use cloud_client::FileChange;
    use cloud_client::HeartbeatResponse;
    use cloud_client::OutboundMessage;
    use cloud_client::PendingBuild;
    use cloud_client::RegisterResponse;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;

    struct ScriptedClient {
        responses: Mutex<Vec<Result<HeartbeatResponse, CloudError>>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CloudApi for ScriptedClient {
        async fn register(&self, _pairing_code: &str) -> Result<RegisterResponse, CloudError> {
            unimplemented!()
        }

        async fn heartbeat(&self, _request: HeartbeatRequest) -> Result<HeartbeatResponse, CloudError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses.lock().unwrap().remove(0)
        }

        async fn post_ingress(&self, _envelope: &ChatIngressEnvelope) -> Result<(), CloudError> {
            unimplemented!()
        }

        async fn poll_outbound(&self, _max: u32) -> Result<Vec<OutboundMessage>, CloudError> {
            unimplemented!()
        }

        async fn ack_outbound(&self, _id: &str, _result: &DeliveryResult) -> Result<(), CloudError> {
            unimplemented!()
        }

        async fn get_bridge_session(&self, _project_id: &str) -> Result<BridgeSession, CloudError> {
            unimplemented!()
        }

        async fn update_bridge_session(&self, _session: &BridgeSession) -> Result<(), CloudError> {
            unimplemented!()
        }

        async fn push_change(&self, _session_id: &str, _change: &FileChange) -> Result<(), CloudError> {
            unimplemented!()
        }

        async fn pull_changes(&self, _session_id: &str) -> Result<Vec<FileChange>, CloudError> {
            unimplemented!()
        }

        async fn query_pending_builds(&self, _project_id: &str) -> Result<Vec<PendingBuild>, CloudError> {
            unimplemented!()
        }

        async fn update_build_record(&self, _update: &BuildRecordUpdate) -> Result<(), CloudError> {
            unimplemented!()
        }

        async fn write_build_output_chunk(
            &self,
            _build_id: &str,
            _chunk_index: u32,
            _stream: &str,
            _data: &[u8],
        ) -> Result<(), CloudError> {
            unimplemented!()
        }
    }

    struct StubPlugin;

    #[async_trait]
    impl ChannelPlugin for StubPlugin {
        fn channel(&self) -> Channel {
            Channel::Whatsapp
        }
        fn display_name(&self) -> &str {
            "stub"
        }
        fn is_supported(&self) -> bool {
            true
        }
        fn unsupported_reason(&self) -> Option<&str> {
            None
        }
        async fn login(&self) -> Result<(), PluginError> {
            unimplemented!()
        }
        async fn is_authenticated(&self) -> bool {
            true
        }
        async fn start(&self, _sink: Arc<dyn InboundSink>, _ctx: CancellationToken) -> Result<(), PluginError> {
            unimplemented!()
        }
        async fn deliver(&self, _envelope: &ChatEgressEnvelope) -> Result<DeliveryResult, PluginError> {
            unimplemented!()
        }
        async fn get_status(&self) -> PluginStatus {
            PluginStatus::Connected
        }
        async fn logout(&self) -> Result<(), PluginError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn adopts_server_controlled_interval_and_fires_immediately() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![Ok(HeartbeatResponse {
                heartbeat_interval_seconds: Some(60),
                has_pending_outbound: false,
            })]),
            calls: AtomicU32::new(0),
        });
        let ctx = CancellationToken::new();
        let ctx_for_loop = ctx.clone();
        let became_online = Arc::new(AtomicU32::new(0));
        let became_online_clone = became_online.clone();

        let handle = tokio::spawn(async move {
            start_heartbeat_loop(
                client,
                HeartbeatPolicy { interval_secs: 30 },
                Arc::new(StubPlugin),
                Instant::now(),
                move || {
                    became_online_clone.fetch_add(1, Ordering::SeqCst);
                },
                ctx_for_loop,
            )
            .await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        ctx.cancel();
        handle.await.unwrap();

        assert!(became_online.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn errors_are_swallowed_and_the_loop_continues() {
        let client = Arc::new(ScriptedClient {
            responses: Mutex::new(vec![Err(CloudError::NetworkError {
                reason: "boom".to_string(),
            })]),
            calls: AtomicU32::new(0),
        });
        let ctx = CancellationToken::new();
        ctx.cancel();

        // Cancelled before the loop starts: it should still attempt the
        // immediate first heartbeat, observe the error, log it, then notice
        // cancellation on the subsequent sleep and return without panicking.
        start_heartbeat_loop(
            client.clone(),
            HeartbeatPolicy { interval_secs: 30 },
            Arc::new(StubPlugin),
            Instant::now(),
            || {},
            ctx,
        )
        .await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
