//! HTTP surface.
//!
//! Three routes: attempt a download, inspect entitlement status, and
//! receive billing provider webhooks. Handlers stay thin; all decisions
//! live in the entitlement core.

use crate::auth::{CurrentUser, TokenVerifier};
use crate::catalog::Catalog;
use crate::entitlement::{DownloadGate, SubscriptionStore, UsageCounter, WebhookReconciler};
use crate::entitlement::usage::ClientMeta;
use crate::error::{DowngateError, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{FromRef, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use std::sync::Arc;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "billing-signature";

/// Shared application state.
pub struct AppState<S, U, C> {
    pub gate: DownloadGate<S, U, C>,
    pub reconciler: Arc<WebhookReconciler<S>>,
    pub verifier: TokenVerifier,
    pub dev_mode: bool,
}

impl<S: Clone, U: Clone, C: Clone> Clone for AppState<S, U, C> {
    fn clone(&self) -> Self {
        Self {
            gate: self.gate.clone(),
            reconciler: self.reconciler.clone(),
            verifier: self.verifier.clone(),
            dev_mode: self.dev_mode,
        }
    }
}

impl<S: Clone, U: Clone, C: Clone> FromRef<AppState<S, U, C>> for TokenVerifier {
    fn from_ref(state: &AppState<S, U, C>) -> Self {
        state.verifier.clone()
    }
}

/// Build the application router.
pub fn router<S, U, C>(state: AppState<S, U, C>) -> Router
where
    S: SubscriptionStore + Clone + 'static,
    U: UsageCounter + Clone + 'static,
    C: Catalog + Clone + 'static,
{
    Router::new()
        .route("/downloads/{asset_id}", post(attempt_download::<S, U, C>))
        .route("/downloads/status", get(download_status::<S, U, C>))
        .route("/billing/webhook", post(billing_webhook::<S, U, C>))
        .with_state(state)
}

/// Serve the router on `addr` until the task is cancelled.
pub async fn serve<S, U, C>(state: AppState<S, U, C>, addr: &str) -> Result<()>
where
    S: SubscriptionStore + Clone + 'static,
    U: UsageCounter + Clone + 'static,
    C: Catalog + Clone + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| DowngateError::internal(format!("failed to bind {}: {}", addr, e)))?;

    tracing::info!(target: "downgate::http", addr, "Listening");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| DowngateError::internal(format!("server error: {}", e)))
}

async fn attempt_download<S, U, C>(
    State(state): State<AppState<S, U, C>>,
    CurrentUser(user): CurrentUser,
    Path(asset_id): Path<String>,
    headers: HeaderMap,
) -> Response
where
    S: SubscriptionStore + Clone + 'static,
    U: UsageCounter + Clone + 'static,
    C: Catalog + Clone + 'static,
{
    let meta = client_meta(&headers);
    match state
        .gate
        .attempt_download(&user, &asset_id, Utc::now(), meta)
        .await
    {
        Ok(grant) => (StatusCode::OK, Json(grant)).into_response(),
        Err(err) => err.into_response_with_dev(state.dev_mode),
    }
}

async fn download_status<S, U, C>(
    State(state): State<AppState<S, U, C>>,
    CurrentUser(user): CurrentUser,
) -> Response
where
    S: SubscriptionStore + Clone + 'static,
    U: UsageCounter + Clone + 'static,
    C: Catalog + Clone + 'static,
{
    match state.gate.status(&user, Utc::now()).await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(err) => err.into_response_with_dev(state.dev_mode),
    }
}

/// Webhook intake. The body must stay raw bytes: signature verification
/// covers the exact payload, so any re-serialization would break it.
async fn billing_webhook<S, U, C>(
    State(state): State<AppState<S, U, C>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: SubscriptionStore + Clone + 'static,
    U: UsageCounter + Clone + 'static,
    C: Catalog + Clone + 'static,
{
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return DowngateError::WebhookRejected("missing signature header".to_string())
            .into_response_with_dev(state.dev_mode);
    };

    let event = match state.reconciler.verify_signature(&body, signature) {
        Ok(event) => event,
        Err(err) => return err.into_response_with_dev(state.dev_mode),
    };

    match state.reconciler.reconcile(event).await {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({ "received": true })),
        )
            .into_response(),
        Err(err) => err.into_response_with_dev(state.dev_mode),
    }
}

fn client_meta(headers: &HeaderMap) -> ClientMeta {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    ClientMeta { ip, user_agent }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_meta_takes_first_forwarded_ip() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.9, 10.0.0.1".parse().unwrap(),
        );
        headers.insert(axum::http::header::USER_AGENT, "curl/8.5".parse().unwrap());

        let meta = client_meta(&headers);
        assert_eq!(meta.ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(meta.user_agent.as_deref(), Some("curl/8.5"));
    }

    #[test]
    fn test_client_meta_tolerates_missing_headers() {
        let meta = client_meta(&HeaderMap::new());
        assert_eq!(meta, ClientMeta::default());
    }
}
