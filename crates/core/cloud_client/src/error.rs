use std::time::Duration;

/// Generic HTTP status → error-code mapping used by every cloud RPC.
#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("device token rejected (401) and refresh also failed")]
    DeviceTokenExpired,

    #[error("unauthorized (401)")]
    Unauthorized,

    #[error("rate limited (429){}", retry_after.map(|d| format!(", retry after {d:?}")).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    #[error("cloud API error: HTTP {status}")]
    ApiError { status: u16 },

    #[error("network error: {reason}")]
    NetworkError { reason: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether the owning loop should treat this as a transient failure
    /// worth retrying at its next tick, as opposed to a fatal one.
    pub fn is_transient(&self) -> bool {
        !matches!(self, CloudError::DeviceTokenExpired)
    }
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        CloudError::NetworkError {
            reason: err.to_string(),
        }
    }
}

/// Maps an HTTP response status (and, for 429, the `Retry-After` header)
/// into the cloud error taxonomy. Call only for non-2xx responses.
pub fn classify_status(status: reqwest::StatusCode, retry_after: Option<Duration>) -> CloudError {
    match status.as_u16() {
        401 => CloudError::Unauthorized,
        429 => CloudError::RateLimited { retry_after },
        500..=599 => CloudError::ApiError {
            status: status.as_u16(),
        },
        other => CloudError::ApiError { status: other },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_statuses() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED, None),
            CloudError::Unauthorized
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, Some(Duration::from_secs(5))),
            CloudError::RateLimited {
                retry_after: Some(_)
            }
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, None),
            CloudError::ApiError { status: 500 }
        ));
    }

    #[test]
    fn device_token_expired_is_not_transient() {
        assert!(!CloudError::DeviceTokenExpired.is_transient());
        assert!(CloudError::ApiError { status: 503 }.is_transient());
    }
}
