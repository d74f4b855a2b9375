//! The channel plugin contract: the capability set every chat-platform
//! adapter implements, the classification of plugin errors the supervisor
//! reacts to, and the three adapter skeletons (WhatsApp, Signal, iMessage).
//!
//! A plugin owns exactly one platform connection for the lifetime of a
//! [`ChannelPlugin::start`] call; the relay supervisor holds the only
//! reference to it and never shares it with another task.

use std::time::Duration;

use async_trait::async_trait;
use cloud_client::ChatEgressEnvelope;
use cloud_client::ChatIngressEnvelope;
use cloud_client::DeliveryResult;
use tokio_util::sync::CancellationToken;

pub mod imessage;
pub mod signal;
pub mod text_format;
pub mod whatsapp;

/// The chat platform a plugin speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Whatsapp,
    Signal,
    Imessage,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Signal => "signal",
            Channel::Imessage => "imessage",
        }
    }
}

/// Human-readable connection status surfaced by `getStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    Disconnected,
    Authenticated,
}

impl PluginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginStatus::Connecting => "connecting",
            PluginStatus::Connected => "connected",
            PluginStatus::Reconnecting => "reconnecting",
            PluginStatus::Disconnecting => "disconnecting",
            PluginStatus::Disconnected => "disconnected",
            PluginStatus::Authenticated => "authenticated",
        }
    }
}

/// Classification of a plugin error, opaque to the supervisor except for
/// this tag. `LoggedOut`/`Replaced` are fatal; `ConnectionLost`/`Unknown`
/// are transient and drive a backoff reconnect.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("session logged out: {reason}")]
    LoggedOut { reason: String },

    #[error("session replaced by another device: {reason}")]
    Replaced { reason: String },

    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("unclassified plugin error: {reason}")]
    Unknown { reason: String },
}

impl PluginError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, PluginError::LoggedOut { .. } | PluginError::Replaced { .. })
    }
}

/// Callback the adapter invokes for every normalised inbound message. The
/// supervisor's `onInbound` fan-in is the only consumer.
#[async_trait]
pub trait InboundSink: Send + Sync {
    async fn on_inbound(&self, envelope: ChatIngressEnvelope);
}

/// The capability set every channel adapter implements.
#[async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn channel(&self) -> Channel;
    fn display_name(&self) -> &str;

    /// Whether this plugin can run at all on the current host (e.g.
    /// iMessage requires macOS).
    fn is_supported(&self) -> bool;

    /// `None` if [`ChannelPlugin::is_supported`] is `true`.
    fn unsupported_reason(&self) -> Option<&str>;

    /// Interactive login (QR, phone-register, or an OS permission prompt).
    /// May print progress to stderr.
    async fn login(&self) -> Result<(), PluginError>;

    /// Pure check of persisted credentials; does not open a connection.
    async fn is_authenticated(&self) -> bool;

    /// Opens the connection, binds `sink` as the inbound handler, and
    /// blocks until `ctx` cancels or a fatal error is classified. A plugin
    /// that returns `Ok(())` on cancellation is indistinguishable from one
    /// that returns on a transient error from the supervisor's point of
    /// view other than via the `Result`; cancellation-triggered exits must
    /// return `Ok(())`.
    async fn start(
        &self,
        sink: std::sync::Arc<dyn InboundSink>,
        ctx: CancellationToken,
    ) -> Result<(), PluginError>;

    /// At-most-once send. Safe to call concurrently only for distinct
    /// conversations; per-conversation serialization within one
    /// conversation is the plugin's own responsibility.
    ///
    /// `Err` models the "deliver throws" case from the outbound poller's
    /// contract: an unexpected failure the adapter could not
    /// even classify into a [`DeliveryResult`], as opposed to `Ok` carrying
    /// a classified success/failure outcome.
    async fn deliver(&self, envelope: &ChatEgressEnvelope) -> Result<DeliveryResult, PluginError>;

    async fn get_status(&self) -> PluginStatus;

    /// Scrubs persisted credentials.
    async fn logout(&self) -> Result<(), PluginError>;
}

/// Classifies a deliver failure into the `retryable` boolean the outbound
/// poller acks with, from a duck-typed error string the way the original
/// system matched substrings — used only as the adapters' last resort when
/// the platform gives no structured error code.
pub fn classify_retryable(error: &str) -> bool {
    const NON_RETRYABLE_HINTS: &[&str] = &["not found", "blocked", "not on platform"];
    let lowered = error.to_lowercase();
    !NON_RETRYABLE_HINTS.iter().any(|hint| lowered.contains(hint))
}

/// Default timeout for one-shot liveness/health probes shared by adapters
/// that spawn a subprocess (Signal's `signal-cli`).
pub const SUBPROCESS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_non_retryable_hints() {
        assert!(!classify_retryable("Error: not on whatsapp"));
        assert!(!classify_retryable("recipient blocked sender"));
        assert!(!classify_retryable("conversation NOT FOUND"));
    }

    #[test]
    fn everything_else_is_retryable() {
        assert!(classify_retryable("socket hang up"));
        assert!(classify_retryable("timed out waiting for ack"));
    }

    #[test]
    fn fatal_classification() {
        assert!(PluginError::LoggedOut { reason: "x".into() }.is_fatal());
        assert!(PluginError::Replaced { reason: "x".into() }.is_fatal());
        assert!(!PluginError::ConnectionLost { reason: "x".into() }.is_fatal());
        assert!(!PluginError::Unknown { reason: "x".into() }.is_fatal());
    }
}
