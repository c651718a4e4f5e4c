//! Subscription persistence.
//!
//! Implement [`SubscriptionStore`] over your database. The trait specifies
//! the invariants any backend must uphold; it does not mandate a storage
//! engine. An in-memory implementation is provided as a reference and for
//! tests.

use crate::error::{DowngateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status reported by the billing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Incomplete,
    Trialing,
    Active,
    PastDue,
    Canceled,
    IncompleteExpired,
    Unpaid,
}

impl ProviderStatus {
    /// Parse from a provider status string. Unknown statuses map to
    /// `Canceled` so they never grant access.
    #[must_use]
    pub fn from_provider(status: &str) -> Self {
        match status {
            "incomplete" => Self::Incomplete,
            "trialing" => Self::Trialing,
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "incomplete_expired" => Self::IncompleteExpired,
            "unpaid" => Self::Unpaid,
            other => {
                tracing::warn!(
                    target: "downgate::entitlement::store",
                    status = other,
                    "Unknown provider status, treating as canceled"
                );
                Self::Canceled
            }
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Trialing => "trialing",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Unpaid => "unpaid",
        }
    }

    /// Whether this status grants download access on its own.
    #[must_use]
    pub fn grants_access(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription status as a tagged variant.
///
/// `Manual` marks legacy or admin-assigned subscriptions with no provider
/// linkage. The distinction is explicit at the type level rather than an
/// absence check on a status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "provider_status", rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Manual,
    Managed(ProviderStatus),
}

impl SubscriptionStatus {
    /// Whether this status grants access: `Manual` always does, `Managed`
    /// only for active or trialing.
    #[must_use]
    pub fn grants_access(&self) -> bool {
        match self {
            Self::Manual => true,
            Self::Managed(ps) => ps.grants_access(),
        }
    }

    #[must_use]
    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual)
    }
}

/// A stored subscription record.
///
/// Created by the webhook reconciler (provider linkage) or by an admin
/// assignment (`Manual`); mutated by later webhook events; never deleted,
/// only deactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSubscription {
    /// Internal subscription ID.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Plan reference; may change over the subscription's life on
    /// upgrade/downgrade.
    pub plan_id: String,
    /// Provider correlation key, unique when present. Absent for manually
    /// provisioned subscriptions.
    pub provider_subscription_id: Option<String>,
    /// Provider customer correlation key.
    pub provider_customer_id: Option<String>,
    /// Tagged status.
    pub status: SubscriptionStatus,
    /// Convenience flag, kept consistent with status by the reconciler
    /// (with the deliberate past_due grace-period exception).
    pub is_active: bool,
    /// Current billing period.
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    /// Whether the subscription cancels at period end.
    pub cancel_at_period_end: bool,
    /// Effective access window.
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredSubscription {
    /// Whether this record grants access at `at`: active flag set, inside
    /// the access window, and a status that grants access.
    ///
    /// `past_due` is the grace-period carve-out: the reconciler leaves
    /// `is_active` untouched on payment failure, and access follows that
    /// flag until the provider gives up and deletes the subscription.
    #[must_use]
    pub fn grants_access_at(&self, at: DateTime<Utc>) -> bool {
        let status_ok = self.status.grants_access()
            || matches!(self.status, SubscriptionStatus::Managed(ProviderStatus::PastDue));
        self.is_active
            && self.start_date <= at
            && self.end_date.map_or(true, |end| at <= end)
            && status_ok
    }
}

/// Persistence operations for subscriptions.
///
/// `replace_active_for_user` must be atomic (one transaction or an
/// equivalent compare-and-swap): the single-active-subscription invariant
/// may never be maintained as two independent writes.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Find the subscription granting `user_id` access at `at`.
    ///
    /// At most one record should satisfy the predicate. If the invariant is
    /// violated, implementations must pick the most recently created
    /// candidate and log the anomaly rather than fail.
    async fn find_active_for_user(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<StoredSubscription>>;

    /// Look up a subscription by its provider correlation key.
    async fn find_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<StoredSubscription>>;

    /// Idempotent create-or-update keyed by `provider_subscription_id`.
    async fn upsert_from_provider(
        &self,
        subscription: StoredSubscription,
    ) -> Result<StoredSubscription>;

    /// Atomically deactivate every active subscription for the owner of
    /// `subscription` and insert `subscription` as the single active one.
    async fn replace_active_for_user(
        &self,
        subscription: StoredSubscription,
    ) -> Result<StoredSubscription>;

    /// Deactivate every currently active subscription for a user. Returns
    /// how many records were deactivated.
    async fn deactivate_all_active_for_user(&self, user_id: &str) -> Result<u32>;

    /// Mark the subscription canceled and inactive. Returns whether a
    /// matching record existed.
    async fn mark_canceled(&self, provider_subscription_id: &str) -> Result<bool>;

    // Provider customer linkage

    /// Link a user to their provider customer ID.
    async fn link_provider_customer(
        &self,
        user_id: &str,
        provider_customer_id: &str,
    ) -> Result<()>;

    /// Resolve a provider customer ID back to a user.
    async fn find_user_by_provider_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<String>>;

    // Webhook idempotency ledger

    /// Check whether a webhook event has already been applied.
    async fn is_event_processed(&self, event_id: &str) -> Result<bool>;

    /// Record a webhook event as applied.
    async fn mark_event_processed(&self, event_id: &str) -> Result<()>;
}

/// In-memory subscription store.
///
/// Reference implementation; all invariant-sensitive operations run under
/// a single write lock, standing in for a database transaction.
#[derive(Default, Clone)]
pub struct InMemorySubscriptionStore {
    inner: std::sync::Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    subscriptions: std::sync::RwLock<Vec<StoredSubscription>>,
    customers: std::sync::RwLock<std::collections::HashMap<String, String>>,
    processed_events: std::sync::RwLock<std::collections::HashMap<String, DateTime<Utc>>>,
}

impl InMemorySubscriptionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored subscriptions, for assertions in tests.
    pub fn all_subscriptions(&self) -> Vec<StoredSubscription> {
        self.inner
            .subscriptions
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    fn read_subs(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<StoredSubscription>>> {
        self.inner
            .subscriptions
            .read()
            .map_err(|_| DowngateError::internal("subscription store lock poisoned"))
    }

    fn write_subs(&self) -> Result<std::sync::RwLockWriteGuard<'_, Vec<StoredSubscription>>> {
        self.inner
            .subscriptions
            .write()
            .map_err(|_| DowngateError::internal("subscription store lock poisoned"))
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_active_for_user(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<StoredSubscription>> {
        let subs = self.read_subs()?;
        let mut candidates: Vec<&StoredSubscription> = subs
            .iter()
            .filter(|s| s.user_id == user_id && s.grants_access_at(at))
            .collect();

        if candidates.len() > 1 {
            tracing::warn!(
                target: "downgate::entitlement::store",
                user_id,
                count = candidates.len(),
                "Multiple active subscriptions for user; using most recently created"
            );
        }

        candidates.sort_by_key(|s| s.created_at);
        Ok(candidates.last().map(|s| (*s).clone()))
    }

    async fn find_by_provider_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Option<StoredSubscription>> {
        let subs = self.read_subs()?;
        Ok(subs
            .iter()
            .find(|s| s.provider_subscription_id.as_deref() == Some(provider_subscription_id))
            .cloned())
    }

    async fn upsert_from_provider(
        &self,
        mut subscription: StoredSubscription,
    ) -> Result<StoredSubscription> {
        let provider_id = subscription.provider_subscription_id.clone().ok_or_else(|| {
            DowngateError::bad_request("upsert_from_provider requires a provider subscription id")
        })?;

        let mut subs = self.write_subs()?;
        subscription.updated_at = Utc::now();

        if let Some(existing) = subs
            .iter_mut()
            .find(|s| s.provider_subscription_id.as_deref() == Some(provider_id.as_str()))
        {
            // Keep internal identity and creation time stable across
            // repeated deliveries of the same provider state.
            subscription.id = existing.id.clone();
            subscription.created_at = existing.created_at;
            *existing = subscription.clone();
        } else {
            subs.push(subscription.clone());
        }

        Ok(subscription)
    }

    async fn replace_active_for_user(
        &self,
        mut subscription: StoredSubscription,
    ) -> Result<StoredSubscription> {
        // Deactivate-then-insert under one lock; the invariant is never
        // exposed half-applied.
        let mut subs = self.write_subs()?;
        let now = Utc::now();

        for s in subs
            .iter_mut()
            .filter(|s| s.user_id == subscription.user_id && s.is_active)
        {
            s.is_active = false;
            s.updated_at = now;
        }

        subscription.updated_at = now;
        subs.push(subscription.clone());
        Ok(subscription)
    }

    async fn deactivate_all_active_for_user(&self, user_id: &str) -> Result<u32> {
        let mut subs = self.write_subs()?;
        let now = Utc::now();
        let mut count = 0;

        for s in subs.iter_mut().filter(|s| s.user_id == user_id && s.is_active) {
            s.is_active = false;
            s.updated_at = now;
            count += 1;
        }

        Ok(count)
    }

    async fn mark_canceled(&self, provider_subscription_id: &str) -> Result<bool> {
        let mut subs = self.write_subs()?;

        match subs
            .iter_mut()
            .find(|s| s.provider_subscription_id.as_deref() == Some(provider_subscription_id))
        {
            Some(s) => {
                s.is_active = false;
                s.status = SubscriptionStatus::Managed(ProviderStatus::Canceled);
                s.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn link_provider_customer(
        &self,
        user_id: &str,
        provider_customer_id: &str,
    ) -> Result<()> {
        self.inner
            .customers
            .write()
            .map_err(|_| DowngateError::internal("customer map lock poisoned"))?
            .insert(provider_customer_id.to_string(), user_id.to_string());
        Ok(())
    }

    async fn find_user_by_provider_customer(
        &self,
        provider_customer_id: &str,
    ) -> Result<Option<String>> {
        Ok(self
            .inner
            .customers
            .read()
            .map_err(|_| DowngateError::internal("customer map lock poisoned"))?
            .get(provider_customer_id)
            .cloned())
    }

    async fn is_event_processed(&self, event_id: &str) -> Result<bool> {
        Ok(self
            .inner
            .processed_events
            .read()
            .map_err(|_| DowngateError::internal("event ledger lock poisoned"))?
            .contains_key(event_id))
    }

    async fn mark_event_processed(&self, event_id: &str) -> Result<()> {
        self.inner
            .processed_events
            .write()
            .map_err(|_| DowngateError::internal("event ledger lock poisoned"))?
            .insert(event_id.to_string(), Utc::now());
        Ok(())
    }
}
