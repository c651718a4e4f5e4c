//! The download gate.
//!
//! Front door for download requests: resolves the asset, evaluates
//! entitlement, and consumes one quota slot atomically. Handlers call the
//! gate and turn its errors into HTTP responses; the gate itself knows
//! nothing about HTTP.

use crate::auth::AuthenticatedUser;
use crate::catalog::{Asset, Catalog};
use crate::entitlement::error::EntitlementError;
use crate::entitlement::evaluate::{
    Decision, DenyReason, EntitlementEvaluator, next_day_start,
};
use crate::entitlement::plans::Plans;
use crate::entitlement::store::SubscriptionStore;
use crate::entitlement::usage::{BoundedRecord, ClientMeta, UsageCounter, UsageRecord};
use crate::error::{DowngateError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// A granted download.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadGrant {
    pub download_url: String,
    /// Remaining quota after this download. `None` (null) for unlimited
    /// admin access.
    pub remaining_downloads: Option<u32>,
    pub asset: Asset,
}

/// Condensed subscription view for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSummary {
    pub plan_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Current entitlement state for a user, without consuming quota.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    pub is_admin: bool,
    pub has_subscription: bool,
    pub can_download: bool,
    /// `None` (null) when unlimited or when there is nothing to count
    /// against (no subscription).
    pub remaining_downloads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionSummary>,
    /// When today's usage window rolls over (next UTC midnight).
    pub resets_at: DateTime<Utc>,
}

/// Orchestrates asset lookup, entitlement evaluation, and quota
/// consumption.
#[derive(Clone)]
pub struct DownloadGate<S, U, C> {
    evaluator: EntitlementEvaluator<S, U>,
    catalog: C,
}

impl<S, U, C> DownloadGate<S, U, C>
where
    S: SubscriptionStore,
    U: UsageCounter,
    C: Catalog,
{
    #[must_use]
    pub fn new(store: S, counter: U, catalog: C, plans: Plans) -> Self {
        Self {
            evaluator: EntitlementEvaluator::new(store, counter, plans),
            catalog,
        }
    }

    /// Attempt a download of `asset_id` for `user` at the instant `at`.
    ///
    /// Order matters: an unknown asset is 404 regardless of entitlement,
    /// so probing the catalog never leaks quota state. Quota is consumed
    /// through the counter's bounded append; the advisory evaluation and
    /// the append may disagree under concurrency, and the append wins.
    pub async fn attempt_download(
        &self,
        user: &AuthenticatedUser,
        asset_id: &str,
        at: DateTime<Utc>,
        meta: ClientMeta,
    ) -> Result<DownloadGrant> {
        let asset = self
            .catalog
            .find_asset(asset_id)
            .await?
            .ok_or_else(|| DowngateError::not_found(format!("asset '{}'", asset_id)))?;

        // Admins bypass subscription and quota checks but still leave an
        // audit record.
        if user.is_admin() {
            let record = UsageRecord::new(&user.id, asset_id, at, meta);
            self.evaluator.counter().record(record).await?;
            tracing::info!(
                target: "downgate::entitlement::gate",
                user_id = %user.id,
                asset_id,
                "Admin download granted"
            );
            return Ok(DownloadGrant {
                download_url: asset.file_url.clone(),
                remaining_downloads: None,
                asset,
            });
        }

        let decision = self.evaluator.evaluate(&user.id, at).await?;
        let plan = match decision {
            Decision::Allow { plan, .. } => plan,
            Decision::Deny {
                reason: DenyReason::NoSubscription,
            } => {
                return Err(EntitlementError::NoSubscription {
                    user_id: user.id.clone(),
                }
                .into());
            }
            Decision::Deny {
                reason: DenyReason::LimitReached { limit, resets_at },
            } => {
                return Err(EntitlementError::LimitReached {
                    user_id: user.id.clone(),
                    limit,
                    resets_at,
                }
                .into());
            }
        };

        let record = UsageRecord::new(&user.id, asset_id, at, meta);
        let outcome = self
            .evaluator
            .counter()
            .record_bounded(record, plan.daily_download_limit)
            .await?;

        match outcome {
            BoundedRecord::Recorded { used, .. } => {
                tracing::info!(
                    target: "downgate::entitlement::gate",
                    user_id = %user.id,
                    asset_id,
                    used,
                    limit = plan.daily_download_limit,
                    "Download granted"
                );
                Ok(DownloadGrant {
                    download_url: asset.file_url.clone(),
                    remaining_downloads: Some(plan.daily_download_limit - used),
                    asset,
                })
            }
            // Lost the race to a concurrent download.
            BoundedRecord::LimitReached { .. } => Err(EntitlementError::LimitReached {
                user_id: user.id.clone(),
                limit: plan.daily_download_limit,
                resets_at: next_day_start(at),
            }
            .into()),
        }
    }

    /// Report the user's entitlement state without consuming quota.
    pub async fn status(
        &self,
        user: &AuthenticatedUser,
        at: DateTime<Utc>,
    ) -> Result<DownloadStatus> {
        let resets_at = next_day_start(at);

        if user.is_admin() {
            let subscription = self.summary_for(&user.id, at).await?;
            return Ok(DownloadStatus {
                is_admin: true,
                has_subscription: subscription.is_some(),
                can_download: true,
                remaining_downloads: None,
                subscription,
                resets_at,
            });
        }

        match self.evaluator.evaluate(&user.id, at).await? {
            Decision::Allow {
                subscription,
                plan,
                remaining,
                ..
            } => Ok(DownloadStatus {
                is_admin: false,
                has_subscription: true,
                can_download: true,
                remaining_downloads: Some(remaining),
                subscription: Some(SubscriptionSummary {
                    plan_name: plan.name,
                    expires_at: subscription.current_period_end,
                }),
                resets_at,
            }),
            Decision::Deny {
                reason: DenyReason::NoSubscription,
            } => Ok(DownloadStatus {
                is_admin: false,
                has_subscription: false,
                can_download: false,
                remaining_downloads: None,
                subscription: None,
                resets_at,
            }),
            Decision::Deny {
                reason: DenyReason::LimitReached { resets_at, .. },
            } => Ok(DownloadStatus {
                is_admin: false,
                has_subscription: true,
                can_download: false,
                remaining_downloads: Some(0),
                subscription: self.summary_for(&user.id, at).await?,
                resets_at,
            }),
        }
    }

    async fn summary_for(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<SubscriptionSummary>> {
        let Some(sub) = self.evaluator.store().find_active_for_user(user_id, at).await? else {
            return Ok(None);
        };
        let plan_name = self
            .evaluator
            .plans()
            .get(&sub.plan_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| sub.plan_id.clone());
        Ok(Some(SubscriptionSummary {
            plan_name,
            expires_at: sub.current_period_end,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::catalog::InMemoryCatalog;
    use crate::entitlement::store::{
        InMemorySubscriptionStore, ProviderStatus, StoredSubscription, SubscriptionStatus,
    };
    use crate::entitlement::usage::InMemoryUsageCounter;
    use chrono::{Duration, TimeZone};

    type TestGate = DownloadGate<InMemorySubscriptionStore, InMemoryUsageCounter, InMemoryCatalog>;

    fn user(id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            id: id.to_string(),
            role: Role::User,
        }
    }

    fn admin(id: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            id: id.to_string(),
            role: Role::Admin,
        }
    }

    fn active_sub(user_id: &str, plan_id: &str) -> StoredSubscription {
        let now = Utc::now();
        StoredSubscription {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            plan_id: plan_id.to_string(),
            provider_subscription_id: Some(format!("psub_{}", user_id)),
            provider_customer_id: None,
            status: SubscriptionStatus::Managed(ProviderStatus::Active),
            is_active: true,
            // The window must reach back far enough to cover the fixed
            // 2026-03-01 instants used by the hardcoded-date tests.
            current_period_start: Some(now - Duration::days(365)),
            current_period_end: Some(now + Duration::days(29)),
            cancel_at_period_end: false,
            start_date: now - Duration::days(365),
            end_date: Some(now + Duration::days(29)),
            created_at: now,
            updated_at: now,
        }
    }

    async fn gate_with_sub(limit: u32) -> TestGate {
        let store = InMemorySubscriptionStore::new();
        store
            .replace_active_for_user(active_sub("u1", "basic"))
            .await
            .unwrap();

        let catalog = InMemoryCatalog::new();
        catalog.add(Asset {
            id: "asset-1".to_string(),
            title: "Sample pack".to_string(),
            file_url: "https://cdn.example.com/asset-1.zip".to_string(),
        });

        let plans = Plans::builder()
            .plan("basic")
                .name("Basic")
                .provider_price("price_basic")
                .daily_download_limit(limit)
                .done()
            .build();

        DownloadGate::new(store, InMemoryUsageCounter::new(), catalog, plans)
    }

    #[tokio::test]
    async fn test_grant_returns_url_and_remaining() {
        let gate = gate_with_sub(5).await;

        let grant = gate
            .attempt_download(&user("u1"), "asset-1", Utc::now(), ClientMeta::default())
            .await
            .unwrap();

        assert_eq!(grant.asset.id, "asset-1");
        assert_eq!(grant.download_url, "https://cdn.example.com/asset-1.zip");
        assert_eq!(grant.remaining_downloads, Some(4));
    }

    #[tokio::test]
    async fn test_unknown_asset_is_not_found_before_entitlement() {
        let gate = gate_with_sub(5).await;

        // Even a user with no subscription sees 404, not 403.
        let err = gate
            .attempt_download(&user("u2"), "ghost", Utc::now(), ClientMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DowngateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_no_subscription_is_denied() {
        let gate = gate_with_sub(5).await;

        let err = gate
            .attempt_download(&user("u2"), "asset-1", Utc::now(), ClientMeta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DowngateError::NoSubscription));
    }

    #[tokio::test]
    async fn test_limit_reached_after_quota_consumed() {
        let gate = gate_with_sub(2).await;
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();

        for _ in 0..2 {
            gate.attempt_download(&user("u1"), "asset-1", at, ClientMeta::default())
                .await
                .unwrap();
        }

        let err = gate
            .attempt_download(&user("u1"), "asset-1", at, ClientMeta::default())
            .await
            .unwrap_err();
        match err {
            DowngateError::LimitReached { resets_at } => {
                assert_eq!(resets_at, Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_admin_bypasses_quota_but_is_audited() {
        let gate = gate_with_sub(1).await;
        let at = Utc::now();

        for _ in 0..3 {
            let grant = gate
                .attempt_download(&admin("boss"), "asset-1", at, ClientMeta::default())
                .await
                .unwrap();
            assert_eq!(grant.remaining_downloads, None);
        }

        let records = gate
            .evaluator
            .counter()
            .records_for_day("boss", at.date_naive())
            .await
            .unwrap();
        assert_eq!(records.len(), 3);

        let status = gate.status(&admin("boss"), at).await.unwrap();
        assert!(status.is_admin);
        assert!(status.can_download);
        assert_eq!(status.remaining_downloads, None);
    }

    #[tokio::test]
    async fn test_status_reports_subscription_and_quota() {
        let gate = gate_with_sub(5).await;
        let at = Utc::now();

        gate.attempt_download(&user("u1"), "asset-1", at, ClientMeta::default())
            .await
            .unwrap();

        let status = gate.status(&user("u1"), at).await.unwrap();
        assert!(!status.is_admin);
        assert!(status.has_subscription);
        assert!(status.can_download);
        assert_eq!(status.remaining_downloads, Some(4));
        let summary = status.subscription.unwrap();
        assert_eq!(summary.plan_name, "Basic");
        assert!(summary.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_status_without_subscription() {
        let gate = gate_with_sub(5).await;

        let status = gate.status(&user("nobody"), Utc::now()).await.unwrap();
        assert!(!status.has_subscription);
        assert!(!status.can_download);
        assert!(status.subscription.is_none());
        assert_eq!(status.remaining_downloads, None);
    }

    #[tokio::test]
    async fn test_status_when_limit_exhausted() {
        let gate = gate_with_sub(1).await;
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();

        gate.attempt_download(&user("u1"), "asset-1", at, ClientMeta::default())
            .await
            .unwrap();

        let status = gate.status(&user("u1"), at).await.unwrap();
        assert!(status.has_subscription);
        assert!(!status.can_download);
        assert_eq!(status.remaining_downloads, Some(0));
        assert_eq!(status.resets_at, Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap());
        // The subscription itself is still fine; only the quota is spent.
        assert!(status.subscription.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_one_slot_many_racers_single_winner() {
        let gate = std::sync::Arc::new(gate_with_sub(1).await);
        let at = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.attempt_download(&user("u1"), "asset-1", at, ClientMeta::default())
                    .await
            }));
        }

        let mut granted = 0;
        let mut limited = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(DowngateError::LimitReached { .. }) => limited += 1,
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(granted, 1);
        assert_eq!(limited, 19);
    }
}
