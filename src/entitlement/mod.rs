//! Download entitlement core.
//!
//! Decides whether a user may download an asset right now, based on their
//! subscription and a per-day usage quota, and keeps subscription state
//! synchronized with the billing provider's webhook stream.
//!
//! # Example
//!
//! ```rust,ignore
//! use downgate::entitlement::{DownloadGate, Plans, WebhookReconciler};
//!
//! let plans = Plans::builder()
//!     .plan("basic")
//!         .name("Basic")
//!         .provider_price("price_basic_monthly")
//!         .daily_download_limit(5)
//!         .done()
//!     .plan("pro")
//!         .name("Pro")
//!         .provider_price("price_pro_monthly")
//!         .daily_download_limit(50)
//!         .done()
//!     .build();
//!
//! let gate = DownloadGate::new(store, counter, catalog, plans.clone());
//! let grant = gate.attempt_download(&user, "asset-1", Utc::now(), meta).await?;
//! ```

pub mod error;
pub mod evaluate;
pub mod gate;
pub mod plans;
pub mod store;
pub mod usage;
pub mod webhook;

pub use error::EntitlementError;
pub use evaluate::{Decision, DenyReason, EntitlementEvaluator, day_start, next_day_start};
pub use gate::{DownloadGate, DownloadGrant, DownloadStatus, SubscriptionSummary};
pub use plans::{BillingInterval, Plan, PlanBuilder, Plans, PlansBuilder};
pub use store::{
    InMemorySubscriptionStore, ProviderStatus, StoredSubscription, SubscriptionStatus,
    SubscriptionStore,
};
pub use usage::{BoundedRecord, ClientMeta, InMemoryUsageCounter, UsageCounter, UsageRecord};
pub use webhook::{BillingEvent, ReconcileOutcome, WebhookReconciler};
