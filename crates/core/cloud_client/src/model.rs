//! Platform-agnostic message envelopes and the outbound-queue wire shapes.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelTag {
    Whatsapp,
    Signal,
    Imessage,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    /// Reference URI or platform-internal id the adapter can resolve.
    pub reference: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// An inbound message, already normalised by the adapter, bound for
/// `postIngress`. Destroyed after a successful ingress-post ack; never
/// buffered to disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatIngressEnvelope {
    pub channel: ChannelTag,
    pub platform_message_id: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub peer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_display_name: Option<String>,
    /// Already transformed to the common markdown dialect.
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaDescriptor>,
    pub is_group: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    /// RFC3339.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentioned_peer_ids: Vec<String>,
}

/// An outbound message bound for an adapter's `deliver`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatEgressEnvelope {
    pub channel: ChannelTag,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
}

/// One queued item returned by `pollOutbound`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub id: String,
    pub envelope: ChatEgressEnvelope,
    pub queued_at: String,
    pub priority: i32,
    pub attempts: u32,
}

/// An adapter's `deliver` outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    #[serde(default)]
    pub duration_ms: u64,
}

impl DeliveryResult {
    pub fn success(platform_message_id: impl Into<String>, duration_ms: u64) -> Self {
        DeliveryResult {
            success: true,
            platform_message_id: Some(platform_message_id.into()),
            error: None,
            retryable: None,
            duration_ms,
        }
    }

    pub fn failure(error: impl Into<String>, retryable: bool, duration_ms: u64) -> Self {
        DeliveryResult {
            success: false,
            platform_message_id: None,
            error: Some(error.into()),
            retryable: Some(retryable),
            duration_ms,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub platform_status: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub heartbeat_interval_seconds: Option<u64>,
    #[serde(default)]
    pub has_pending_outbound: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub relay_id: String,
    pub device_token: String,
    pub device_token_expiry: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AckOutboundRequest<'a> {
    pub message_id: &'a str,
    #[serde(flatten)]
    pub result: &'a DeliveryResult,
}
