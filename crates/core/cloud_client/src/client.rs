//! `HttpCloudClient`: the reqwest-backed implementation of [`CloudApi`].
//!
//! A 401 triggers a single-flight token refresh: the first caller to see it
//! takes a lock and refreshes, every concurrent caller piggybacks on the
//! same in-flight refresh instead of hammering the register endpoint, and
//! the original request is retried exactly once with the new token. A
//! refresh failure surfaces as [`CloudError::DeviceTokenExpired`], which the
//! supervisor treats as fatal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

use crate::error::classify_status;
use crate::error::CloudError;
use crate::model::AckOutboundRequest;
use crate::model::ChatIngressEnvelope;
use crate::model::DeliveryResult;
use crate::model::HeartbeatRequest;
use crate::model::HeartbeatResponse;
use crate::model::OutboundMessage;
use crate::model::RegisterResponse;

/// One bridge file-sync session's server-tracked state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSession {
    pub session_id: String,
    pub project_id: String,
    pub is_present: bool,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    pub path: String,
    pub content_hash: Option<String>,
    pub contents_base64: Option<String>,
    pub deleted: bool,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingBuild {
    pub build_id: String,
    pub command: String,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
}

/// One inline error/warning surfaced while streaming a build's output.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildDiagnostic {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecordUpdate {
    pub build_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BuildDiagnostic>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<BuildDiagnostic>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Source of truth for the device token, refreshed in place on 401.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn current_token(&self) -> Option<String>;

    /// Exchanges whatever durable credential backs this source (e.g. a
    /// refresh token, or the original pairing code) for a new device token.
    /// Returns the error the register-equivalent call produced on failure.
    async fn refresh(&self) -> Result<String, CloudError>;
}

/// All cloud RPCs consumed by the relay and bridge loops.
#[async_trait]
pub trait CloudApi: Send + Sync {
    async fn register(&self, pairing_code: &str) -> Result<RegisterResponse, CloudError>;
    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<HeartbeatResponse, CloudError>;
    async fn post_ingress(&self, envelope: &ChatIngressEnvelope) -> Result<(), CloudError>;
    async fn poll_outbound(&self, max: u32) -> Result<Vec<OutboundMessage>, CloudError>;
    async fn ack_outbound(&self, message_id: &str, result: &DeliveryResult) -> Result<(), CloudError>;

    async fn get_bridge_session(&self, project_id: &str) -> Result<BridgeSession, CloudError>;
    async fn update_bridge_session(&self, session: &BridgeSession) -> Result<(), CloudError>;

    async fn push_change(&self, session_id: &str, change: &FileChange) -> Result<(), CloudError>;
    async fn pull_changes(&self, session_id: &str) -> Result<Vec<FileChange>, CloudError>;

    async fn query_pending_builds(&self, project_id: &str) -> Result<Vec<PendingBuild>, CloudError>;
    async fn update_build_record(&self, update: &BuildRecordUpdate) -> Result<(), CloudError>;
    async fn write_build_output_chunk(
        &self,
        build_id: &str,
        chunk_index: u32,
        stream: &str,
        data: &[u8],
    ) -> Result<(), CloudError>;
}

/// Guards the single-flight token refresh: `None` means no refresh is in
/// flight; callers that observe `Some` await the same oneshot rather than
/// starting their own.
enum RefreshState {
    Idle,
    InFlight(Arc<tokio::sync::Notify>),
}

pub struct HttpCloudClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    token: RwLock<Option<String>>,
    refresh_state: Mutex<RefreshState>,
}

impl HttpCloudClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenSource>) -> Self {
        HttpCloudClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            tokens,
            token: RwLock::new(None),
            refresh_state: Mutex::new(RefreshState::Idle),
        }
    }

    async fn bearer_token(&self) -> Option<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Some(token);
        }
        let token = self.tokens.current_token().await;
        *self.token.write().await = token.clone();
        token
    }

    /// Runs the single-flight refresh. Every caller that loses the race to
    /// acquire `refresh_state` waits on the same [`tokio::sync::Notify`]
    /// instead of issuing a redundant refresh call.
    async fn refresh_token(&self) -> Result<String, CloudError> {
        let notify = {
            let mut state = self.refresh_state.lock().await;
            match &*state {
                RefreshState::InFlight(notify) => Some(notify.clone()),
                RefreshState::Idle => {
                    *state = RefreshState::InFlight(Arc::new(tokio::sync::Notify::new()));
                    None
                }
            }
        };

        if let Some(notify) = notify {
            notify.notified().await;
            return self
                .token
                .read()
                .await
                .clone()
                .ok_or(CloudError::DeviceTokenExpired);
        }

        let result = self.tokens.refresh().await;

        let notify = {
            let mut state = self.refresh_state.lock().await;
            let notify = match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::InFlight(notify) => notify,
                RefreshState::Idle => Arc::new(tokio::sync::Notify::new()),
            };
            notify
        };

        match result {
            Ok(token) => {
                *self.token.write().await = Some(token.clone());
                notify.notify_waiters();
                Ok(token)
            }
            Err(err) => {
                notify.notify_waiters();
                Err(err)
            }
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Sends one request, transparently handling 401-refresh-retry-once and
    /// 429 `Retry-After` honoring. `build` must be cheap to call twice.
    async fn send(
        &self,
        build: impl Fn(&reqwest::Client, Option<&str>) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, CloudError> {
        let token = self.bearer_token().await;
        let response = build(&self.http, token.as_deref()).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let refreshed = self.refresh_token().await?;
            let retried = build(&self.http, Some(&refreshed)).send().await?;
            return Self::check_status(retried).await;
        }

        Self::check_status(response).await
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CloudError> {
        if response.status().is_success() {
            return Ok(response);
        }

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(CloudError::RateLimited { retry_after });
        }

        Err(classify_status(response.status(), None))
    }
}

#[async_trait]
impl CloudApi for HttpCloudClient {
    async fn register(&self, pairing_code: &str) -> Result<RegisterResponse, CloudError> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            pairing_code: &'a str,
        }

        let url = self.url("/v1/register");
        let response = self
            .http
            .post(&url)
            .json(&Body { pairing_code })
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn heartbeat(&self, request: HeartbeatRequest) -> Result<HeartbeatResponse, CloudError> {
        let url = self.url("/v1/heartbeat");
        let response = self
            .send(|http, token| {
                let mut req = http.post(&url).json(&request);
                if let Some(token) = token {
                    req = req.bearer_auth(token);
                }
                req
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn post_ingress(&self, envelope: &ChatIngressEnvelope) -> Result<(), CloudError> {
        let url = self.url("/v1/ingress");
        self.send(|http, token| {
            let mut req = http.post(&url).json(envelope);
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn poll_outbound(&self, max: u32) -> Result<Vec<OutboundMessage>, CloudError> {
        let url = self.url("/v1/outbound");
        let response = self
            .send(|http, token| {
                let mut req = http.get(&url).query(&[("max", max)]);
                if let Some(token) = token {
                    req = req.bearer_auth(token);
                }
                req
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn ack_outbound(&self, message_id: &str, result: &DeliveryResult) -> Result<(), CloudError> {
        let url = self.url("/v1/outbound/ack");
        let body = AckOutboundRequest { message_id, result };
        self.send(|http, token| {
            let mut req = http.post(&url).json(&body);
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn get_bridge_session(&self, project_id: &str) -> Result<BridgeSession, CloudError> {
        let url = self.url(&format!("/v1/bridge/session/{project_id}"));
        let response = self
            .send(|http, token| {
                let mut req = http.get(&url);
                if let Some(token) = token {
                    req = req.bearer_auth(token);
                }
                req
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn update_bridge_session(&self, session: &BridgeSession) -> Result<(), CloudError> {
        let url = self.url(&format!("/v1/bridge/session/{}", session.session_id));
        self.send(|http, token| {
            let mut req = http.put(&url).json(session);
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn push_change(&self, session_id: &str, change: &FileChange) -> Result<(), CloudError> {
        let url = self.url(&format!("/v1/bridge/session/{session_id}/push"));
        self.send(|http, token| {
            let mut req = http.post(&url).json(change);
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn pull_changes(&self, session_id: &str) -> Result<Vec<FileChange>, CloudError> {
        #[derive(serde::Deserialize)]
        struct WireChange {
            path: String,
            content_hash: Option<String>,
            contents_base64: Option<String>,
            #[serde(default)]
            deleted: bool,
        }

        let url = self.url(&format!("/v1/bridge/session/{session_id}/pull"));
        let response = self
            .send(|http, token| {
                let mut req = http.get(&url);
                if let Some(token) = token {
                    req = req.bearer_auth(token);
                }
                req
            })
            .await?;
        let wire: Vec<WireChange> = response.json().await?;
        Ok(wire
            .into_iter()
            .map(|w| FileChange {
                path: w.path,
                content_hash: w.content_hash,
                contents_base64: w.contents_base64,
                deleted: w.deleted,
            })
            .collect())
    }

    async fn query_pending_builds(&self, project_id: &str) -> Result<Vec<PendingBuild>, CloudError> {
        let url = self.url(&format!("/v1/bridge/project/{project_id}/builds"));
        let response = self
            .send(|http, token| {
                let mut req = http.get(&url);
                if let Some(token) = token {
                    req = req.bearer_auth(token);
                }
                req
            })
            .await?;
        Ok(response.json().await?)
    }

    async fn update_build_record(&self, update: &BuildRecordUpdate) -> Result<(), CloudError> {
        let url = self.url(&format!("/v1/bridge/build/{}", update.build_id));
        self.send(|http, token| {
            let mut req = http.put(&url).json(update);
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn write_build_output_chunk(
        &self,
        build_id: &str,
        chunk_index: u32,
        stream: &str,
        data: &[u8],
    ) -> Result<(), CloudError> {
        let url = self.url(&format!(
            "/v1/bridge/build/{build_id}/chunk/{chunk_index:06}?stream={stream}"
        ));
        let body = bytes::Bytes::copy_from_slice(data);
        self.send(|http, token| {
            let mut req = http
                .post(&url)
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(body.clone());
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            req
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    struct CountingTokenSource {
        refreshes: AtomicU32,
    }

    #[async_trait]
    impl TokenSource for CountingTokenSource {
        async fn current_token(&self) -> Option<String> {
            Some("stale".to_string())
        }

        async fn refresh(&self) -> Result<String, CloudError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok("fresh".to_string())
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_collapse_to_one_call() {
        let source = Arc::new(CountingTokenSource {
            refreshes: AtomicU32::new(0),
        });
        let client = Arc::new(HttpCloudClient::new("https://example.invalid", source.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            handles.push(tokio::spawn(async move { client.refresh_token().await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(source.refreshes.load(Ordering::SeqCst), 1);
    }
}
