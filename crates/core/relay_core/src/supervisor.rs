//! The relay supervisor: the reconnect state machine that owns a
//! channel plugin for the lifetime of one connection, fans its inbound
//! events out to the cloud, and runs the heartbeat loop and outbound poller
//! alongside it under one per-attempt cancellation scope.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use channel_plugin::ChannelPlugin;
use channel_plugin::InboundSink;
use channel_plugin::PluginError;
use cloud_client::CloudApi;
use cloud_client::ChatIngressEnvelope;
use relay_backoff::compute_backoff;
use relay_backoff::BackoffPolicy;
use relay_config::HeartbeatPolicy;
use relay_config::OutboundPolicy;
use relay_config::ReconnectPolicy;
use relay_utils::sleep::abort_aware_sleep;
use relay_utils::sleep::SleepOutcome;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::exit_code::ExitCode;
use crate::heartbeat::start_heartbeat_loop;
use crate::outbound_poller::start_outbound_poller;
use crate::outbound_poller::PollerOutcome;

/// Terminal result of [`RelaySupervisor::run`].
#[derive(Debug)]
pub enum ExitOutcome {
    /// Root cancellation observed; every sub-loop shut down cleanly.
    Shutdown,
    /// `logged-out`/`replaced`/device-token-expired: reconnecting would not
    /// help without user action.
    Unauthorized { reason: String },
    /// The resolved channel plugin reports it cannot run on this host.
    Unsupported { reason: String },
    /// A bounded `max_attempts` reconnect budget was exhausted.
    GeneralError { reason: String },
}

impl ExitOutcome {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExitOutcome::Shutdown => ExitCode::Success,
            ExitOutcome::Unauthorized { .. } => ExitCode::Unauthorized,
            // The start-up check aborts with exit code 4 for an
            // unsupported plugin, the same code as UNAUTHORIZED.
            ExitOutcome::Unsupported { .. } => ExitCode::Unauthorized,
            ExitOutcome::GeneralError { .. } => ExitCode::GeneralError,
        }
    }
}

/// One attempt's shared completion signals: when the heartbeat loop first
/// observes a 2xx response, it notifies `became_online` (so a subsequent
/// transient disconnect resets the reconnect-attempt counter) and the
/// watchdog task stops racing the connect-timeout.
#[derive(Default)]
struct ConnectionSignals {
    online_notify: Notify,
    became_online: AtomicBool,
}

impl ConnectionSignals {
    fn mark_online(&self) {
        if !self.became_online.swap(true, Ordering::SeqCst) {
            self.online_notify.notify_waiters();
        }
    }
}

/// Forwards every normalised inbound message straight to
/// `cloudRPC.postIngress`, retrying transient network failures once at the
/// RPC layer and logging (never buffering to disk) on failure.
struct IngressForwarder {
    client: Arc<dyn CloudApi>,
}

#[async_trait::async_trait]
impl InboundSink for IngressForwarder {
    async fn on_inbound(&self, envelope: ChatIngressEnvelope) {
        if let Err(err) = self.client.post_ingress(&envelope).await {
            tracing::warn!(
                channel = ?envelope.channel,
                conversation_id = %envelope.conversation_id,
                error = %err,
                "postIngress failed; message is not buffered to disk and relies on platform redelivery"
            );
        }
    }
}

/// Outcome of one reconnect attempt, before translating into a backoff
/// decision or a fatal [`ExitOutcome`].
enum AttemptOutcome {
    Fatal(String),
    Transient(String),
}

pub struct RelaySupervisor {
    client: Arc<dyn CloudApi>,
    plugin: Arc<dyn ChannelPlugin>,
    reconnect: ReconnectPolicy,
    heartbeat_policy: HeartbeatPolicy,
    outbound_policy: OutboundPolicy,
}

impl RelaySupervisor {
    pub fn new(
        client: Arc<dyn CloudApi>,
        plugin: Arc<dyn ChannelPlugin>,
        reconnect: ReconnectPolicy,
        heartbeat_policy: HeartbeatPolicy,
        outbound_policy: OutboundPolicy,
    ) -> Self {
        RelaySupervisor {
            client,
            plugin,
            reconnect,
            heartbeat_policy,
            outbound_policy,
        }
    }

    /// Runs the `Disconnected -> Connecting -> Online -> Disconnected |
    /// FatallyFailed` state machine until `root` cancels or a fatal error is
    /// classified.
    pub async fn run(self, root: CancellationToken) -> ExitOutcome {
        if !self.plugin.is_supported() {
            return ExitOutcome::Unsupported {
                reason: self
                    .plugin
                    .unsupported_reason()
                    .unwrap_or("unsupported")
                    .to_string(),
            };
        }

        let backoff_policy = BackoffPolicy {
            initial_delay_ms: self.reconnect.initial_delay_ms,
            max_delay_ms: self.reconnect.max_delay_ms,
        };

        let mut attempt: u32 = 0;
        loop {
            if root.is_cancelled() {
                return ExitOutcome::Shutdown;
            }

            if let Some(max_attempts) = self.reconnect.max_attempts {
                if attempt >= max_attempts {
                    return ExitOutcome::GeneralError {
                        reason: format!("exhausted max reconnect attempts ({max_attempts})"),
                    };
                }
            }

            let attempt_result = self.run_one_attempt(&root).await;
            match attempt_result.outcome {
                None => return ExitOutcome::Shutdown,
                Some(AttemptOutcome::Fatal(reason)) => {
                    return ExitOutcome::Unauthorized { reason }
                }
                Some(AttemptOutcome::Transient(reason)) => {
                    tracing::warn!(attempt, %reason, "relay connection lost, reconnecting with backoff");
                }
            }

            // A connection that made it Online at least once resets the
            // backoff counter: the next attempt starts from the initial
            // delay rather than compounding on top of this one's position
            // in the sequence.
            if attempt_result.became_online {
                attempt = 0;
            }

            let delay_ms = compute_backoff(backoff_policy, attempt);
            if abort_aware_sleep(std::time::Duration::from_millis(delay_ms), &root).await
                == SleepOutcome::Cancelled
            {
                return ExitOutcome::Shutdown;
            }
            attempt = attempt.saturating_add(1);
        }
    }

    /// Runs the plugin's connection plus its heartbeat loop and outbound
    /// poller under one child cancellation scope, returning `None` only when
    /// the root itself was cancelled (a clean shutdown), otherwise the
    /// classified cause of this attempt's end.
    async fn run_one_attempt(&self, root: &CancellationToken) -> AttemptResult {
        let child = root.child_token();
        let signals = Arc::new(ConnectionSignals::default());
        let started_at = Instant::now();

        let sink: Arc<dyn InboundSink> = Arc::new(IngressForwarder {
            client: self.client.clone(),
        });

        let mut plugin_task = {
            let plugin = self.plugin.clone();
            let ctx = child.clone();
            tokio::spawn(async move { plugin.start(sink, ctx).await })
        };

        let heartbeat_task = {
            let client = self.client.clone();
            let plugin = self.plugin.clone();
            let policy = self.heartbeat_policy;
            let signals = signals.clone();
            let ctx = child.clone();
            tokio::spawn(async move {
                start_heartbeat_loop(
                    client,
                    policy,
                    plugin,
                    started_at,
                    move || signals.mark_online(),
                    ctx,
                )
                .await;
            })
        };

        let mut poller_task = {
            let client = self.client.clone();
            let plugin = self.plugin.clone();
            let policy = self.outbound_policy;
            let ctx = child.clone();
            tokio::spawn(async move { start_outbound_poller(client, policy, plugin, ctx).await })
        };

        let watchdog_timeout =
            std::time::Duration::from_secs(self.reconnect.watchdog_timeout_secs);
        let watchdog_signals = signals.clone();
        let mut watchdog_task = tokio::spawn(async move {
            tokio::select! {
                () = watchdog_signals.online_notify.notified() => {
                    // Connected in time; this attempt's watchdog no longer
                    // applies, so it idles rather than ever firing.
                    std::future::pending::<()>().await
                }
                () = tokio::time::sleep(watchdog_timeout) => {}
            }
        });

        // Select by `&mut` reference rather than by value, so whichever
        // handles did *not* win the race are still owned here afterward and
        // can be awaited to completion rather than silently dropped.
        let mut plugin_done = false;
        let mut poller_done = false;
        let mut watchdog_done = false;
        let outcome = tokio::select! {
            biased;
            () = root.cancelled() => None,
            result = &mut plugin_task => {
                plugin_done = true;
                Some(classify_plugin_result(result))
            }
            result = &mut poller_task => {
                poller_done = true;
                Some(classify_poller_result(result))
            }
            _ = &mut watchdog_task => {
                watchdog_done = true;
                Some(AttemptOutcome::Transient("watchdog: no successful heartbeat within timeout".to_string()))
            }
        };

        child.cancel();

        // Every sibling is awaited before this attempt is considered over,
        // so a plugin's socket-close flush or the poller's in-flight
        // deliver/ack always finishes before the next attempt spins up a
        // fresh plugin/poller pair. The task that already completed above
        // is not re-polled (a `JoinHandle` cannot be awaited twice).
        if !plugin_done {
            let _ = plugin_task.await;
        }
        if !poller_done {
            let _ = poller_task.await;
        }
        if !watchdog_done {
            let _ = watchdog_task.await;
        }
        let _ = heartbeat_task.await;

        AttemptResult {
            outcome,
            became_online: signals.became_online.load(Ordering::SeqCst),
        }
    }
}

/// Result of one reconnect attempt: its classified end cause plus whether
/// the connection ever reached `Online`, which the outer loop uses to
/// decide whether to reset the backoff-attempt counter.
struct AttemptResult {
    outcome: Option<AttemptOutcome>,
    became_online: bool,
}

fn classify_plugin_result(
    result: Result<Result<(), PluginError>, tokio::task::JoinError>,
) -> AttemptOutcome {
    match result {
        Ok(Ok(())) => AttemptOutcome::Transient("plugin connection closed".to_string()),
        Ok(Err(err)) if err.is_fatal() => AttemptOutcome::Fatal(err.to_string()),
        Ok(Err(err)) => AttemptOutcome::Transient(err.to_string()),
        Err(join_err) => AttemptOutcome::Transient(format!("plugin task panicked: {join_err}")),
    }
}

fn classify_poller_result(
    result: Result<PollerOutcome, tokio::task::JoinError>,
) -> AttemptOutcome {
    match result {
        Ok(PollerOutcome::DeviceTokenExpired) => {
            AttemptOutcome::Fatal("device token expired (DEVICE_TOKEN_EXPIRED)".to_string())
        }
        Ok(PollerOutcome::Cancelled) => {
            AttemptOutcome::Transient("outbound poller cancelled".to_string())
        }
        Err(join_err) => AttemptOutcome::Transient(format!("poller task panicked: {join_err}")),
    }
}
