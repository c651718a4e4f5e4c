//! Plan directory.
//!
//! Maps plan IDs to download limits and correlates billing-provider price
//! IDs back to plans when reconciling webhook events.
//!
//! ```rust,ignore
//! let plans = Plans::builder()
//!     .plan("basic")
//!         .name("Basic")
//!         .provider_price("price_basic_monthly")
//!         .daily_download_limit(5)
//!         .done()
//!     .build();
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A subscription plan.
///
/// Immutable once referenced by an active subscription, except through
/// admin-driven reconfiguration of the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Internal plan identifier (e.g., "basic", "pro").
    pub id: String,
    /// Display name shown to users.
    pub name: String,
    /// Downloads allowed per UTC calendar day. Unlimited access is
    /// role-based (admin), never expressed through this limit.
    pub daily_download_limit: u32,
    /// Billing-provider price ID this plan correlates to.
    pub provider_price_id: String,
    /// Billing cycle.
    pub interval: BillingInterval,
}

/// Billing interval for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Monthly,
    Yearly,
}

/// A collection of plan configurations.
#[derive(Clone, Debug, Default)]
pub struct Plans {
    plans: HashMap<String, Plan>,
}

impl Plans {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn builder() -> PlansBuilder {
        PlansBuilder::new()
    }

    /// Get a plan by ID.
    #[must_use]
    pub fn get(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    /// Find a plan by its billing-provider price ID.
    #[must_use]
    pub fn find_by_provider_price(&self, price_id: &str) -> Option<&Plan> {
        self.plans
            .values()
            .find(|p| p.provider_price_id == price_id)
    }

    #[must_use]
    pub fn contains(&self, plan_id: &str) -> bool {
        self.plans.contains_key(plan_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn add(&mut self, plan: Plan) {
        self.plans.insert(plan.id.clone(), plan);
    }
}

/// Builder for a [`Plans`] collection.
#[derive(Default)]
pub struct PlansBuilder {
    plans: Vec<Plan>,
}

impl PlansBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring a plan.
    #[must_use]
    pub fn plan(self, id: impl Into<String>) -> PlanBuilder {
        PlanBuilder {
            parent: self,
            id: id.into(),
            name: None,
            daily_download_limit: 0,
            provider_price_id: String::new(),
            interval: BillingInterval::Monthly,
        }
    }

    #[must_use]
    pub fn build(self) -> Plans {
        let plans = self
            .plans
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        Plans { plans }
    }
}

/// Builder for a single plan within a [`PlansBuilder`] chain.
pub struct PlanBuilder {
    parent: PlansBuilder,
    id: String,
    name: Option<String>,
    daily_download_limit: u32,
    provider_price_id: String,
    interval: BillingInterval,
}

impl PlanBuilder {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn daily_download_limit(mut self, limit: u32) -> Self {
        self.daily_download_limit = limit;
        self
    }

    #[must_use]
    pub fn provider_price(mut self, price_id: impl Into<String>) -> Self {
        self.provider_price_id = price_id.into();
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: BillingInterval) -> Self {
        self.interval = interval;
        self
    }

    /// Finish this plan and return to the parent builder.
    #[must_use]
    pub fn done(mut self) -> PlansBuilder {
        let name = self.name.unwrap_or_else(|| self.id.clone());
        self.parent.plans.push(Plan {
            id: self.id,
            name,
            daily_download_limit: self.daily_download_limit,
            provider_price_id: self.provider_price_id,
            interval: self.interval,
        });
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_plans() -> Plans {
        Plans::builder()
            .plan("basic")
                .name("Basic")
                .provider_price("price_basic_monthly")
                .daily_download_limit(5)
                .done()
            .plan("pro")
                .name("Pro")
                .provider_price("price_pro_monthly")
                .daily_download_limit(50)
                .interval(BillingInterval::Yearly)
                .done()
            .build()
    }

    #[test]
    fn test_builder_and_lookup() {
        let plans = test_plans();
        assert_eq!(plans.len(), 2);

        let basic = plans.get("basic").unwrap();
        assert_eq!(basic.name, "Basic");
        assert_eq!(basic.daily_download_limit, 5);
        assert_eq!(basic.interval, BillingInterval::Monthly);

        assert!(plans.contains("pro"));
        assert!(plans.get("enterprise").is_none());
    }

    #[test]
    fn test_find_by_provider_price() {
        let plans = test_plans();
        let plan = plans.find_by_provider_price("price_pro_monthly").unwrap();
        assert_eq!(plan.id, "pro");
        assert!(plans.find_by_provider_price("price_unknown").is_none());
    }

    #[test]
    fn test_name_defaults_to_id() {
        let plans = Plans::builder()
            .plan("starter")
                .provider_price("price_starter")
                .daily_download_limit(3)
                .done()
            .build();
        assert_eq!(plans.get("starter").unwrap().name, "starter");
    }
}
