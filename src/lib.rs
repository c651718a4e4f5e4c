//! # downgate
//!
//! Download entitlement service core: decides whether a user may download
//! an asset right now, enforces per-day download quotas, and keeps
//! subscription state in sync with a billing provider's webhook stream.
//!
//! # Features
//!
//! - **Entitlement**: subscription-and-quota download decisions with an
//!   atomic per-(user, day) quota consumption step
//! - **Webhooks**: billing provider event reconciliation with signature
//!   verification and idempotency
//! - **Authentication**: JWT bearer tokens, verified on every request
//! - **HTTP**: Axum routes for downloads, status, and webhook intake
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use downgate::{self, Config};
//! use downgate::entitlement::{DownloadGate, Plans, WebhookReconciler};
//!
//! #[tokio::main]
//! async fn main() {
//!     downgate::init_tracing();
//!
//!     let config = Config::from_env();
//!     let plans = Plans::builder()
//!         .plan("basic")
//!             .name("Basic")
//!             .provider_price("price_basic_monthly")
//!             .daily_download_limit(5)
//!             .done()
//!         .build();
//!
//!     // Wire a store, counter, and catalog into an AppState, then:
//!     // downgate::http::serve(state, "0.0.0.0:3000").await.unwrap();
//! }
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod http;

pub use auth::{AuthenticatedUser, CurrentUser, Role, TokenIssuer, TokenVerifier};
pub use catalog::{Asset, Catalog, InMemoryCatalog};
pub use config::Config;
pub use entitlement::{
    DownloadGate, DownloadGrant, DownloadStatus, Plans, SubscriptionStore, UsageCounter,
    WebhookReconciler,
};
pub use error::{DowngateError, Result};
pub use http::AppState;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults.
///
/// Call this early, typically first thing in main().
///
/// # Environment Variables
///
/// - `RUST_LOG`: log filter (e.g., "info", "debug", "downgate=debug")
/// - `DOWNGATE_LOG_JSON`: set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("DOWNGATE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Initialize tracing from a loaded [`Config`].
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::new(&config.logging.level);

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
