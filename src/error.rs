use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// The main error type for downgate.
#[derive(Debug, thiserror::Error)]
pub enum DowngateError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller has no subscription granting download access.
    #[error("No active subscription")]
    NoSubscription,

    /// The caller exhausted the daily download quota.
    #[error("Daily download limit reached")]
    LimitReached {
        /// When the quota resets (next UTC day start).
        resets_at: DateTime<Utc>,
    },

    /// A webhook payload failed verification and was dropped.
    #[error("Webhook rejected: {0}")]
    WebhookRejected(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    /// The backing store cannot be reached. Entitlement decisions are
    /// never fabricated in this state; the request fails.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Machine-readable denial reason codes surfaced to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReasonCode {
    #[serde(rename = "NO_SUBSCRIPTION")]
    NoSubscription,
    #[serde(rename = "LIMIT_REACHED")]
    LimitReached,
}

/// Body for entitlement denials (403/429).
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DenialResponse {
    reason: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    resets_at: Option<String>,
}

/// Generic error body for everything else.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    error_id: String,
}

impl DowngateError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn storage_unavailable(msg: impl Into<String>) -> Self {
        Self::StorageUnavailable(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::WebhookRejected(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NoSubscription => StatusCode::FORBIDDEN,
            Self::LimitReached { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) | Self::Anyhow(_) | Self::StorageUnavailable(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a safe error message suitable for client responses in production.
    ///
    /// Client errors (4xx) expose their message; server errors (5xx) return a
    /// generic message to prevent information disclosure. Full details are
    /// logged server-side either way.
    fn safe_message(&self) -> String {
        match self {
            Self::NotFound(msg) => format!("Not found: {}", msg),
            Self::BadRequest(msg) => format!("Bad request: {}", msg),
            Self::Unauthorized(msg) => format!("Unauthorized: {}", msg),
            Self::WebhookRejected(msg) => format!("Webhook rejected: {}", msg),
            Self::NoSubscription => "No active subscription".to_string(),
            Self::LimitReached { .. } => "Daily download limit reached".to_string(),
            Self::Internal(_) | Self::Anyhow(_) | Self::StorageUnavailable(_) => {
                "Internal server error".to_string()
            }
        }
    }

    /// Convert to a response, optionally exposing full 5xx details.
    ///
    /// `dev_mode` should only be true in development-style environments.
    pub fn into_response_with_dev(self, dev_mode: bool) -> Response {
        // Entitlement denials carry a machine-readable reason code, always
        // surfaced to the caller regardless of environment.
        match &self {
            Self::NoSubscription => {
                let body = Json(DenialResponse {
                    reason: ReasonCode::NoSubscription,
                    resets_at: None,
                });
                return (StatusCode::FORBIDDEN, body).into_response();
            }
            Self::LimitReached { resets_at } => {
                let body = Json(DenialResponse {
                    reason: ReasonCode::LimitReached,
                    resets_at: Some(resets_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
                });
                return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            }
            _ => {}
        }

        let status = self.status_code();
        let error_msg = if dev_mode {
            self.to_string()
        } else {
            self.safe_message()
        };

        let error_id = uuid::Uuid::new_v4().to_string();

        tracing::error!(
            status = status.as_u16(),
            error_id = %error_id,
            error = %self,
            "Request failed"
        );

        let body = Json(ErrorResponse {
            error: error_msg,
            error_id,
        });

        (status, body).into_response()
    }
}

impl IntoResponse for DowngateError {
    fn into_response(self) -> Response {
        self.into_response_with_dev(false)
    }
}

/// Result type alias for downgate operations.
pub type Result<T> = std::result::Result<T, DowngateError>;

impl From<serde_json::Error> for DowngateError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            DowngateError::BadRequest(format!("JSON error: {}", err))
        } else {
            DowngateError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DowngateError::not_found("asset").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DowngateError::unauthorized("no token").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            DowngateError::NoSubscription.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            DowngateError::LimitReached {
                resets_at: Utc::now()
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            DowngateError::WebhookRejected("bad signature".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DowngateError::storage_unavailable("db down").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_no_subscription_body_carries_reason_code() {
        let response = DowngateError::NoSubscription.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["reason"], "NO_SUBSCRIPTION");
    }

    #[tokio::test]
    async fn test_limit_reached_body_carries_reset_time() {
        let resets_at = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        let response = DowngateError::LimitReached { resets_at }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["reason"], "LIMIT_REACHED");
        assert_eq!(json["resetsAt"], "2026-03-02T00:00:00Z");
    }

    #[tokio::test]
    async fn test_production_mode_hides_internal_details() {
        let err = DowngateError::internal("db password is 'hunter2'");
        let response = err.into_response_with_dev(false);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["error"], "Internal server error");
        assert!(!json["error"].as_str().unwrap().contains("hunter2"));
    }

    #[tokio::test]
    async fn test_dev_mode_shows_internal_details() {
        let err = DowngateError::internal("connection pool exhausted");
        let response = err.into_response_with_dev(true);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert!(json["error"]
            .as_str()
            .unwrap()
            .contains("connection pool exhausted"));
    }

    #[tokio::test]
    async fn test_storage_unavailable_never_leaks_details() {
        let err = DowngateError::storage_unavailable("pg at db-prod-01:5432 unreachable");
        let response = err.into_response();

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }

    #[test]
    fn test_from_serde_json_error() {
        let result: std::result::Result<serde_json::Value, _> =
            serde_json::from_str("{ invalid json }");
        let err: DowngateError = result.unwrap_err().into();
        assert!(matches!(err, DowngateError::BadRequest(_)));
    }
}
