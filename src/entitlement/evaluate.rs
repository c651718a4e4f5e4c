//! Entitlement evaluation.
//!
//! Answers "may this user download right now, and how much quota is
//! left?" from the subscription store and the usage counter. Evaluation
//! is read-only and advisory: the authoritative quota check happens when
//! the download gate consumes a slot through
//! [`UsageCounter::record_bounded`](super::UsageCounter::record_bounded).

use crate::entitlement::error::EntitlementError;
use crate::entitlement::plans::{Plan, Plans};
use crate::entitlement::store::{StoredSubscription, SubscriptionStore};
use crate::entitlement::usage::UsageCounter;
use crate::error::Result;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};

/// Start of the UTC calendar day containing `at`.
#[must_use]
pub fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN))
}

/// Start of the UTC calendar day after the one containing `at`. This is
/// when a quota exhausted at `at` resets.
#[must_use]
pub fn next_day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    day_start(at) + chrono::Duration::days(1)
}

/// Why a download would be denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No subscription grants access at the evaluation instant.
    NoSubscription,
    /// The plan's daily quota is exhausted.
    LimitReached {
        limit: u32,
        resets_at: DateTime<Utc>,
    },
}

/// Outcome of an entitlement evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow {
        subscription: StoredSubscription,
        plan: Plan,
        used: u32,
        remaining: u32,
    },
    Deny {
        reason: DenyReason,
    },
}

impl Decision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Evaluates subscription entitlement and remaining quota.
#[derive(Clone)]
pub struct EntitlementEvaluator<S, U> {
    store: S,
    counter: U,
    plans: Plans,
}

impl<S, U> EntitlementEvaluator<S, U>
where
    S: SubscriptionStore,
    U: UsageCounter,
{
    #[must_use]
    pub fn new(store: S, counter: U, plans: Plans) -> Self {
        Self {
            store,
            counter,
            plans,
        }
    }

    /// Evaluate `user_id` at the instant `at`.
    ///
    /// A missing or non-granting subscription and an exhausted quota are
    /// decisions, not errors. A subscription referencing an unknown plan
    /// is an error: the evaluator never invents a limit.
    pub async fn evaluate(&self, user_id: &str, at: DateTime<Utc>) -> Result<Decision> {
        let Some(subscription) = self.store.find_active_for_user(user_id, at).await? else {
            return Ok(Decision::Deny {
                reason: DenyReason::NoSubscription,
            });
        };

        let plan = self
            .plans
            .get(&subscription.plan_id)
            .cloned()
            .ok_or_else(|| EntitlementError::PlanNotFound {
                plan_id: subscription.plan_id.clone(),
            })?;

        let used = self.counter.count_for_day(user_id, at.date_naive()).await?;
        if used >= plan.daily_download_limit {
            return Ok(Decision::Deny {
                reason: DenyReason::LimitReached {
                    limit: plan.daily_download_limit,
                    resets_at: next_day_start(at),
                },
            });
        }

        let remaining = plan.daily_download_limit - used;
        Ok(Decision::Allow {
            subscription,
            plan,
            used,
            remaining,
        })
    }

    pub(crate) fn plans(&self) -> &Plans {
        &self.plans
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn counter(&self) -> &U {
        &self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entitlement::store::{
        InMemorySubscriptionStore, ProviderStatus, SubscriptionStatus,
    };
    use crate::entitlement::usage::{ClientMeta, InMemoryUsageCounter, UsageRecord};
    use crate::error::DowngateError;
    use chrono::{Duration, TimeZone};

    fn test_plans() -> Plans {
        Plans::builder()
            .plan("basic")
                .provider_price("price_basic")
                .daily_download_limit(2)
                .done()
            .build()
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
            end_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn evaluator(
        store: InMemorySubscriptionStore,
        counter: InMemoryUsageCounter,
    ) -> EntitlementEvaluator<InMemorySubscriptionStore, InMemoryUsageCounter> {
        EntitlementEvaluator::new(store, counter, test_plans())
    }

    #[test]
    fn test_day_boundaries_are_utc_midnight() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap();
        assert_eq!(day_start(at), Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(
            next_day_start(at),
            Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_no_subscription_denies() {
        let eval = evaluator(InMemorySubscriptionStore::new(), InMemoryUsageCounter::new());
        let decision = eval.evaluate("u1", Utc::now()).await.unwrap();
        assert_eq!(
            decision,
            Decision::Deny {
                reason: DenyReason::NoSubscription
            }
        );
    }

    #[tokio::test]
    async fn test_allows_with_remaining_quota() {
        let store = InMemorySubscriptionStore::new();
        let counter = InMemoryUsageCounter::new();
        store
            .replace_active_for_user(active_sub("u1", "basic"))
            .await
            .unwrap();

        let now = Utc::now();
        counter
            .record(UsageRecord::new("u1", "a", now, ClientMeta::default()))
            .await
            .unwrap();

        let decision = evaluator(store, counter).evaluate("u1", now).await.unwrap();
        match decision {
            Decision::Allow { used, remaining, plan, .. } => {
                assert_eq!(used, 1);
                assert_eq!(remaining, 1);
                assert_eq!(plan.id, "basic");
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_denies_when_quota_exhausted() {
        let store = InMemorySubscriptionStore::new();
        let counter = InMemoryUsageCounter::new();
        store
            .replace_active_for_user(active_sub("u1", "basic"))
            .await
            .unwrap();

        let now = Utc.with_ymd_and_hms(2026, 3, 1, 18, 30, 0).unwrap();
        for i in 0..2 {
            counter
                .record(UsageRecord::new(
                    "u1",
                    &format!("asset-{}", i),
                    now,
                    ClientMeta::default(),
                ))
                .await
                .unwrap();
        }

        let decision = evaluator(store, counter).evaluate("u1", now).await.unwrap();
        assert_eq!(
            decision,
            Decision::Deny {
                reason: DenyReason::LimitReached {
                    limit: 2,
                    resets_at: Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
                }
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_plan_is_an_error_not_a_denial() {
        let store = InMemorySubscriptionStore::new();
        store
            .replace_active_for_user(active_sub("u1", "ghost-plan"))
            .await
            .unwrap();

        let err = evaluator(store, InMemoryUsageCounter::new())
            .evaluate("u1", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, DowngateError::Internal(_)));
    }

    #[tokio::test]
    async fn test_past_due_keeps_access_during_grace_period() {
        let store = InMemorySubscriptionStore::new();
        let mut sub = active_sub("u1", "basic");
        sub.status = SubscriptionStatus::Managed(ProviderStatus::PastDue);
        sub.is_active = true;
        store.replace_active_for_user(sub).await.unwrap();

        let decision = evaluator(store, InMemoryUsageCounter::new())
            .evaluate("u1", Utc::now())
            .await
            .unwrap();
        assert!(decision.is_allowed());
    }

    #[tokio::test]
    async fn test_canceled_subscription_denies() {
        let store = InMemorySubscriptionStore::new();
        let mut sub = active_sub("u1", "basic");
        sub.status = SubscriptionStatus::Managed(ProviderStatus::Canceled);
        sub.is_active = false;
        store.replace_active_for_user(sub).await.unwrap();

        let decision = evaluator(store, InMemoryUsageCounter::new())
            .evaluate("u1", Utc::now())
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision::Deny {
                reason: DenyReason::NoSubscription
            }
        );
    }
}
