//! iMessage adapter skeleton, macOS-only.
//!
//! Outbound delivery shells out to an OS scripting bridge (AppleScript/JXA)
//! with the message text embedded in a single-line script. The core's job
//! is exactly the escaping contract: backslashes are doubled before
//! quotes are escaped, and the payload is split on CR/LF and rejoined with
//! the scripting bridge's own line-continuation token so the generated
//! script never spans multiple lines itself. Inbound delivery (polling the
//! local `chat.db` on a 2s interval, decoding Apple's 2001-01-01-epoch
//! timestamps) is explicitly out of this core's scope per the
//! specification and is not implemented here.

use std::sync::Arc;

use async_trait::async_trait;
use cloud_client::ChatEgressEnvelope;
use cloud_client::DeliveryResult;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::classify_retryable;
use crate::Channel;
use crate::ChannelPlugin;
use crate::InboundSink;
use crate::PluginError;
use crate::PluginStatus;

/// AppleScript's own line-continuation token, used to join what was
/// originally a multi-line payload back into one script line.
const SCRIPT_LINEFEED_TOKEN: &str = "\" & linefeed & \"";

/// Escapes `text` for embedding inside a double-quoted AppleScript string
/// literal and flattens any embedded newlines so the generated script is
/// always a single line.
///
/// Order matters: backslashes must be doubled *before* quotes are escaped,
/// otherwise the backslash inserted ahead of an escaped quote would itself
/// need escaping and the two passes would interact.
pub fn escape_for_applescript(text: &str) -> String {
    let backslashes_doubled = text.replace('\\', "\\\\");
    let quotes_escaped = backslashes_doubled.replace('"', "\\\"");

    // Collapse CRLF pairs first: splitting on '\r' and '\n' as two
    // independent delimiters would otherwise see a CRLF as two breaks and
    // emit an extra empty segment (hence a doubled token) between them.
    let newlines_normalized = quotes_escaped.replace("\r\n", "\n");

    newlines_normalized
        .split(['\r', '\n'])
        .collect::<Vec<_>>()
        .join(SCRIPT_LINEFEED_TOKEN)
}

fn send_script(conversation_id: &str, escaped_text: &str) -> String {
    format!(
        r#"tell application "Messages" to send "{escaped_text}" to chat id "{conversation_id}""#,
    )
}

pub struct IMessagePlugin;

impl IMessagePlugin {
    pub fn new() -> Self {
        IMessagePlugin
    }
}

impl Default for IMessagePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelPlugin for IMessagePlugin {
    fn channel(&self) -> Channel {
        Channel::Imessage
    }

    fn display_name(&self) -> &str {
        "iMessage"
    }

    fn is_supported(&self) -> bool {
        cfg!(target_os = "macos")
    }

    fn unsupported_reason(&self) -> Option<&str> {
        if self.is_supported() {
            None
        } else {
            Some("iMessage requires macOS")
        }
    }

    async fn login(&self) -> Result<(), PluginError> {
        // iMessage authenticates via the host's own Messages.app/iCloud
        // session; there is no separate pairing step for this plugin to
        // drive.
        Ok(())
    }

    async fn is_authenticated(&self) -> bool {
        self.is_supported()
    }

    async fn start(
        &self,
        _sink: Arc<dyn InboundSink>,
        ctx: CancellationToken,
    ) -> Result<(), PluginError> {
        if !self.is_supported() {
            return Err(PluginError::Unknown {
                reason: self.unsupported_reason().unwrap_or("unsupported").to_string(),
            });
        }
        // Inbound polling of chat.db is explicitly out of this core's
        // scope; this skeleton only owns the lifecycle contract.
        ctx.cancelled().await;
        Ok(())
    }

    async fn deliver(&self, envelope: &ChatEgressEnvelope) -> Result<DeliveryResult, PluginError> {
        if !self.is_supported() {
            return Ok(DeliveryResult::failure("iMessage requires macOS", false, 0));
        }

        let escaped = escape_for_applescript(&envelope.text);
        let script = send_script(&envelope.conversation_id, &escaped);

        let start = std::time::Instant::now();
        let output = Command::new("osascript").arg("-e").arg(&script).output().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match output {
            Ok(output) if output.status.success() => {
                Ok(DeliveryResult::success(envelope.conversation_id.clone(), duration_ms))
            }
            Ok(output) => {
                let error = String::from_utf8_lossy(&output.stderr).trim().to_string();
                let retryable = classify_retryable(&error);
                Ok(DeliveryResult::failure(error, retryable, duration_ms))
            }
            Err(err) => Err(PluginError::Unknown {
                reason: err.to_string(),
            }),
        }
    }

    async fn get_status(&self) -> PluginStatus {
        if self.is_supported() {
            PluginStatus::Authenticated
        } else {
            PluginStatus::Disconnected
        }
    }

    async fn logout(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_backslashes_before_escaping_quotes() {
        let escaped = escape_for_applescript(r#"a\b"c"#);
        // `\` -> `\\` first, then `"` -> `\"`: `a\b"c` becomes `a\\b\"c`.
        assert_eq!(escaped, r#"a\\b\"c"#);
    }

    #[test]
    fn splits_crlf_into_linefeed_concatenation() {
        let escaped = escape_for_applescript("line one\r\nline two");
        assert_eq!(
            escaped,
            format!("line one{SCRIPT_LINEFEED_TOKEN}line two")
        );
        assert!(!escaped.contains('\n'));
        assert!(!escaped.contains('\r'));
    }

    #[test]
    fn plain_text_is_unchanged() {
        assert_eq!(escape_for_applescript("hello"), "hello");
    }

    #[test]
    fn generated_script_is_a_single_line() {
        let escaped = escape_for_applescript("line one\nline two\nline three");
        let script = send_script("chat123", &escaped);
        assert_eq!(script.lines().count(), 1);
    }
}
