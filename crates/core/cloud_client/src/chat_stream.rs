//! Parser for the chat-proxy streaming RPC.
//!
//! The server emits line-delimited events prefixed `data:`, each a JSON
//! object with optional `content` (full accumulated text so far), `delta`
//! (incremental text), `done`, `error`, `status`, and `blocked`. Partial
//! lines must be buffered across reads; on `done` the parser prefers the
//! server-provided `content` but falls back to the concatenation of every
//! `delta` seen, covering servers that close the stream without a final
//! `done` event (scenario: deltas `"A"`, `"B"`, then EOF).

use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::CloudError;

const CHAT_STREAM_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize, Default)]
struct RawChatEvent {
    content: Option<String>,
    delta: Option<String>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
    status: Option<String>,
    #[serde(default)]
    blocked: bool,
}

/// One parsed event surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatStreamEvent {
    Delta(String),
    Status(String),
    Blocked,
}

/// Accumulates `delta`s across a stream so `done`'s fallback content can be
/// computed even when the server never sends a final `content` field.
#[derive(Debug, Default)]
struct Accumulator {
    deltas: String,
}

impl Accumulator {
    fn push_delta(&mut self, delta: &str) {
        self.deltas.push_str(delta);
    }

    fn final_content(&self, server_content: Option<&str>) -> String {
        server_content
            .map(str::to_string)
            .unwrap_or_else(|| self.deltas.clone())
    }
}

/// Extracts complete `data:`-prefixed lines out of a growing byte buffer,
/// keeping a trailing partial line buffered for the next push.
#[derive(Debug, Default)]
struct SseLineBuffer {
    pending: String,
}

impl SseLineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(bytes));

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line = self.pending[..pos].trim_end_matches('\r').to_string();
            self.pending.drain(..=pos);
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim_start();
                if !data.is_empty() {
                    lines.push(data.to_string());
                }
            }
        }
        lines
    }
}

/// Outcome of consuming an entire chat stream to completion.
pub struct ChatStreamOutcome {
    pub content: String,
}

/// Consumes a byte stream of SSE frames until `done`, a stream error, EOF,
/// or `cancel`/the 120s timeout fires, invoking `on_event` for every delta,
/// status, or blocked notification observed along the way.
pub async fn consume_chat_stream<S, E>(
    mut byte_stream: S,
    cancel: &CancellationToken,
    mut on_event: impl FnMut(ChatStreamEvent),
) -> Result<ChatStreamOutcome, CloudError>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut buffer = SseLineBuffer::default();
    let mut accumulator = Accumulator::default();

    let body = async {
        loop {
            let Some(chunk) = byte_stream.next().await else {
                // EOF without an explicit `done`: fall back to the
                // concatenation of every delta seen so far.
                return Ok(ChatStreamOutcome {
                    content: accumulator.final_content(None),
                });
            };

            let chunk = chunk.map_err(|err| CloudError::NetworkError {
                reason: err.to_string(),
            })?;

            for line in buffer.push(&chunk) {
                let event: RawChatEvent = serde_json::from_str(&line)?;

                if let Some(error) = event.error {
                    return Err(CloudError::NetworkError { reason: error });
                }

                if let Some(delta) = &event.delta {
                    accumulator.push_delta(delta);
                    on_event(ChatStreamEvent::Delta(delta.clone()));
                }

                if let Some(status) = event.status {
                    on_event(ChatStreamEvent::Status(status));
                }

                if event.blocked {
                    on_event(ChatStreamEvent::Blocked);
                }

                if event.done {
                    return Ok(ChatStreamOutcome {
                        content: accumulator.final_content(event.content.as_deref()),
                    });
                }
            }
        }
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CloudError::NetworkError { reason: "chat stream cancelled".to_string() }),
        result = tokio::time::timeout(CHAT_STREAM_TIMEOUT, body) => {
            result.map_err(|_| CloudError::NetworkError { reason: "chat stream timed out".to_string() })?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunk(s: &str) -> Result<bytes::Bytes, std::io::Error> {
        Ok(bytes::Bytes::from(s.to_string()))
    }

    #[tokio::test]
    async fn falls_back_to_delta_concatenation_on_eof_without_done() {
        let frames = stream::iter(vec![
            chunk("data: {\"delta\":\"A\"}\n"),
            chunk("data: {\"delta\":\"B\"}\n"),
        ]);
        let cancel = CancellationToken::new();
        let mut deltas = Vec::new();

        let outcome = consume_chat_stream(frames, &cancel, |event| {
            if let ChatStreamEvent::Delta(d) = event {
                deltas.push(d);
            }
        })
        .await
        .unwrap();

        assert_eq!(deltas, vec!["A", "B"]);
        assert_eq!(outcome.content, "AB");
    }

    #[tokio::test]
    async fn prefers_server_content_on_done() {
        let frames = stream::iter(vec![
            chunk("data: {\"delta\":\"A\"}\n"),
            chunk("data: {\"done\":true,\"content\":\"full answer\"}\n"),
        ]);
        let cancel = CancellationToken::new();

        let outcome = consume_chat_stream(frames, &cancel, |_| {}).await.unwrap();
        assert_eq!(outcome.content, "full answer");
    }

    #[tokio::test]
    async fn buffers_partial_lines_across_chunks() {
        let frames = stream::iter(vec![
            chunk("data: {\"del"),
            chunk("ta\":\"AB\"}\n"),
            chunk("data: {\"done\":true}\n"),
        ]);
        let cancel = CancellationToken::new();

        let outcome = consume_chat_stream(frames, &cancel, |_| {}).await.unwrap();
        assert_eq!(outcome.content, "AB");
    }

    #[tokio::test]
    async fn error_event_stops_the_stream() {
        let frames = stream::iter(vec![
            chunk("data: {\"delta\":\"A\"}\n"),
            chunk("data: {\"error\":\"blocked by policy\"}\n"),
            chunk("data: {\"delta\":\"never seen\"}\n"),
        ]);
        let cancel = CancellationToken::new();

        let err = consume_chat_stream(frames, &cancel, |_| {}).await.unwrap_err();
        assert!(matches!(err, CloudError::NetworkError { .. }));
    }

    #[tokio::test]
    async fn cancellation_stops_the_stream_promptly() {
        let frames = stream::pending::<Result<bytes::Bytes, std::io::Error>>();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = consume_chat_stream(frames, &cancel, |_| {}).await.unwrap_err();
        assert!(matches!(err, CloudError::NetworkError { .. }));
    }
}
