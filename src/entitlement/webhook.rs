//! Billing provider webhook reconciliation.
//!
//! Verifies inbound event signatures and translates provider events into
//! local subscription state. Verification happens before any mutation;
//! lookup misses (unknown customer, price, or subscription) are logged and
//! skipped rather than failed, since provider redelivery is independent of
//! our bookkeeping.

use crate::entitlement::error::EntitlementError;
use crate::entitlement::plans::Plans;
use crate::entitlement::store::{
    ProviderStatus, StoredSubscription, SubscriptionStatus, SubscriptionStore,
};
use crate::error::{DowngateError, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Maximum accepted age of a signed webhook timestamp, in seconds.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// A parsed billing provider event.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BillingEvent {
    /// Provider event ID, the idempotency key.
    pub id: String,
    /// Event type (e.g., "customer.subscription.created").
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: BillingEventData,
    /// Unix timestamp of event creation at the provider.
    pub created: u64,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct BillingEventData {
    /// The provider object that triggered the event.
    pub object: serde_json::Value,
}

/// Outcome of reconciling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Local state was updated.
    Processed,
    /// Event type is not one we react to.
    Ignored,
    /// Event was recognized but referenced unknown state; logged and
    /// acknowledged without mutation.
    Skipped,
    /// Event ID was already applied.
    AlreadyProcessed,
}

/// Reconciles billing provider webhook events into the subscription store.
///
/// The webhook secret is held in a [`SecretString`] so it never appears in
/// debug output.
pub struct WebhookReconciler<S> {
    store: S,
    webhook_secret: SecretString,
    plans: Plans,
}

impl<S: SubscriptionStore> WebhookReconciler<S> {
    #[must_use]
    pub fn new(store: S, webhook_secret: impl Into<SecretString>, plans: Plans) -> Self {
        Self {
            store,
            webhook_secret: webhook_secret.into(),
            plans,
        }
    }

    /// Verify the signature header against the exact payload bytes and
    /// parse the event.
    ///
    /// The header format is `t=<unix seconds>,v1=<hex hmac>`, with the MAC
    /// computed over `"{t}.{payload}"`. Comparison is constant-time, and
    /// timestamps older than five minutes are rejected to limit replay.
    pub fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<BillingEvent> {
        let sig_parts = parse_signature_header(signature)?;

        let now = Utc::now().timestamp();
        let age = (now - sig_parts.timestamp).abs();
        if age > TIMESTAMP_TOLERANCE_SECS {
            return Err(EntitlementError::WebhookTimestampExpired { age_seconds: age }.into());
        }

        let signed_payload = format!(
            "{}.{}",
            sig_parts.timestamp,
            String::from_utf8_lossy(payload)
        );
        let expected = compute_signature(
            self.webhook_secret.expose_secret(),
            signed_payload.as_bytes(),
        )?;

        let expected_bytes = hex::decode(&expected)
            .map_err(|_| DowngateError::internal("hex encode produced invalid hex"))?;
        let provided_bytes = hex::decode(&sig_parts.signature)
            .map_err(|_| EntitlementError::InvalidWebhookSignature)?;

        if expected_bytes.ct_eq(&provided_bytes).unwrap_u8() != 1 {
            return Err(EntitlementError::InvalidWebhookSignature.into());
        }

        // Detailed parse failures are logged, not echoed to the caller.
        let event: BillingEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(
                target: "downgate::entitlement::webhook",
                error = %e,
                "Failed to parse webhook payload"
            );
            EntitlementError::InvalidWebhookPayload {
                message: "malformed JSON payload".to_string(),
            }
        })?;

        Ok(event)
    }

    /// Apply a verified event to local state.
    ///
    /// Duplicate event IDs short-circuit via the idempotency ledger. Each
    /// event is one independent unit of work; nothing here spans events.
    pub async fn reconcile(&self, event: BillingEvent) -> Result<ReconcileOutcome> {
        if self.store.is_event_processed(&event.id).await? {
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let outcome = match event.event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(&event).await?,
            "customer.subscription.created" => self.handle_subscription_created(&event).await?,
            "customer.subscription.updated" => self.handle_subscription_updated(&event).await?,
            "customer.subscription.deleted" => self.handle_subscription_deleted(&event).await?,
            "invoice.payment_succeeded" => self.handle_payment_succeeded(&event).await?,
            "invoice.payment_failed" => self.handle_payment_failed(&event).await?,
            _ => ReconcileOutcome::Ignored,
        };

        if !matches!(outcome, ReconcileOutcome::Ignored) {
            self.store.mark_event_processed(&event.id).await?;
        }

        Ok(outcome)
    }

    /// Checkout completion carries the user-to-customer linkage in its
    /// metadata; the subscription itself arrives in a separate event.
    async fn handle_checkout_completed(&self, event: &BillingEvent) -> Result<ReconcileOutcome> {
        let object = &event.data.object;
        let customer_id = object.get("customer").and_then(|v| v.as_str());
        let user_id = object
            .get("metadata")
            .and_then(|m| m.get("user_id"))
            .and_then(|v| v.as_str());

        match (user_id, customer_id) {
            (Some(user_id), Some(customer_id)) => {
                self.store
                    .link_provider_customer(user_id, customer_id)
                    .await?;
                Ok(ReconcileOutcome::Processed)
            }
            _ => Ok(ReconcileOutcome::Ignored),
        }
    }

    async fn handle_subscription_created(&self, event: &BillingEvent) -> Result<ReconcileOutcome> {
        let data = parse_subscription_object(&event.data.object)?;

        let Some(user_id) = self.resolve_user(&data).await? else {
            tracing::warn!(
                target: "downgate::entitlement::webhook",
                event_id = %event.id,
                customer_id = %data.customer_id,
                "Unknown provider customer, skipping event"
            );
            return Ok(ReconcileOutcome::Skipped);
        };

        let Some(plan) = data
            .price_id
            .as_deref()
            .and_then(|p| self.plans.find_by_provider_price(p))
        else {
            tracing::warn!(
                target: "downgate::entitlement::webhook",
                event_id = %event.id,
                price_id = data.price_id.as_deref().unwrap_or("<missing>"),
                "Unknown provider price, skipping event"
            );
            return Ok(ReconcileOutcome::Skipped);
        };

        let status = ProviderStatus::from_provider(&data.status);
        let now = Utc::now();
        let subscription = StoredSubscription {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            plan_id: plan.id.clone(),
            provider_subscription_id: Some(data.id.clone()),
            provider_customer_id: Some(data.customer_id.clone()),
            status: SubscriptionStatus::Managed(status),
            is_active: status.grants_access(),
            current_period_start: data.current_period_start,
            current_period_end: data.current_period_end,
            cancel_at_period_end: data.cancel_at_period_end,
            start_date: data.current_period_start.unwrap_or(now),
            // The access window tracks the paid period; renewals extend it.
            end_date: data.current_period_end,
            created_at: now,
            updated_at: now,
        };

        // One atomic replace keeps the single-active-subscription
        // invariant even when the provider creates a new subscription
        // before we see the old one's deletion.
        self.store.replace_active_for_user(subscription).await?;
        Ok(ReconcileOutcome::Processed)
    }

    async fn handle_subscription_updated(&self, event: &BillingEvent) -> Result<ReconcileOutcome> {
        let data = parse_subscription_object(&event.data.object)?;

        let Some(mut stored) = self.store.find_by_provider_id(&data.id).await? else {
            tracing::warn!(
                target: "downgate::entitlement::webhook",
                event_id = %event.id,
                provider_subscription_id = %data.id,
                "Unknown provider subscription, skipping event"
            );
            return Ok(ReconcileOutcome::Skipped);
        };

        // Price change means plan change (upgrade/downgrade), same record.
        if let Some(price_id) = data.price_id.as_deref() {
            match self.plans.find_by_provider_price(price_id) {
                Some(plan) => stored.plan_id = plan.id.clone(),
                None => {
                    tracing::warn!(
                        target: "downgate::entitlement::webhook",
                        event_id = %event.id,
                        price_id,
                        "Unknown provider price on update, skipping event"
                    );
                    return Ok(ReconcileOutcome::Skipped);
                }
            }
        }

        let status = ProviderStatus::from_provider(&data.status);
        stored.status = SubscriptionStatus::Managed(status);
        stored.is_active = status.grants_access();
        stored.current_period_start = data.current_period_start;
        stored.current_period_end = data.current_period_end;
        stored.cancel_at_period_end = data.cancel_at_period_end;
        stored.end_date = data.current_period_end;

        self.store.upsert_from_provider(stored).await?;
        Ok(ReconcileOutcome::Processed)
    }

    async fn handle_subscription_deleted(&self, event: &BillingEvent) -> Result<ReconcileOutcome> {
        let subscription_id = event
            .data
            .object
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EntitlementError::InvalidWebhookPayload {
                message: "missing subscription id".to_string(),
            })?;

        if self.store.mark_canceled(subscription_id).await? {
            Ok(ReconcileOutcome::Processed)
        } else {
            tracing::warn!(
                target: "downgate::entitlement::webhook",
                event_id = %event.id,
                provider_subscription_id = subscription_id,
                "Unknown provider subscription on delete, skipping event"
            );
            Ok(ReconcileOutcome::Skipped)
        }
    }

    /// A paid invoice is the renewal signal: refresh the billing period
    /// and restore active status.
    async fn handle_payment_succeeded(&self, event: &BillingEvent) -> Result<ReconcileOutcome> {
        let object = &event.data.object;
        let Some(subscription_id) = object.get("subscription").and_then(|v| v.as_str()) else {
            // One-off invoice, nothing to reconcile.
            return Ok(ReconcileOutcome::Ignored);
        };

        let Some(mut stored) = self.store.find_by_provider_id(subscription_id).await? else {
            tracing::warn!(
                target: "downgate::entitlement::webhook",
                event_id = %event.id,
                provider_subscription_id = subscription_id,
                "Unknown provider subscription on paid invoice, skipping event"
            );
            return Ok(ReconcileOutcome::Skipped);
        };

        if let Some(start) = object.get("period_start").and_then(|v| v.as_i64()) {
            stored.current_period_start = DateTime::from_timestamp(start, 0);
        }
        if let Some(end) = object.get("period_end").and_then(|v| v.as_i64()) {
            stored.current_period_end = DateTime::from_timestamp(end, 0);
        }
        stored.end_date = stored.current_period_end;
        stored.status = SubscriptionStatus::Managed(ProviderStatus::Active);
        stored.is_active = true;

        self.store.upsert_from_provider(stored).await?;
        Ok(ReconcileOutcome::Processed)
    }

    /// A failed payment marks the subscription past due but deliberately
    /// leaves `is_active` and the billing period alone: access persists
    /// through the provider's retry window.
    async fn handle_payment_failed(&self, event: &BillingEvent) -> Result<ReconcileOutcome> {
        let object = &event.data.object;
        let Some(subscription_id) = object.get("subscription").and_then(|v| v.as_str()) else {
            return Ok(ReconcileOutcome::Ignored);
        };

        let Some(mut stored) = self.store.find_by_provider_id(subscription_id).await? else {
            tracing::warn!(
                target: "downgate::entitlement::webhook",
                event_id = %event.id,
                provider_subscription_id = subscription_id,
                "Unknown provider subscription on failed invoice, skipping event"
            );
            return Ok(ReconcileOutcome::Skipped);
        };

        stored.status = SubscriptionStatus::Managed(ProviderStatus::PastDue);

        self.store.upsert_from_provider(stored).await?;
        Ok(ReconcileOutcome::Processed)
    }

    async fn resolve_user(&self, data: &ProviderSubscriptionData) -> Result<Option<String>> {
        if let Some(user_id) = self
            .store
            .find_user_by_provider_customer(&data.customer_id)
            .await?
        {
            return Ok(Some(user_id));
        }

        // Fallback for subscriptions created before we saw a checkout
        // event: the provider metadata carries our user id.
        if let Some(user_id) = &data.metadata_user_id {
            self.store
                .link_provider_customer(user_id, &data.customer_id)
                .await?;
            return Ok(Some(user_id.clone()));
        }

        Ok(None)
    }
}

/// Fields extracted from a provider subscription object.
struct ProviderSubscriptionData {
    id: String,
    customer_id: String,
    status: String,
    price_id: Option<String>,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    cancel_at_period_end: bool,
    metadata_user_id: Option<String>,
}

fn parse_subscription_object(object: &serde_json::Value) -> Result<ProviderSubscriptionData> {
    let obj = object
        .as_object()
        .ok_or_else(|| EntitlementError::InvalidWebhookPayload {
            message: "subscription object is not a JSON object".to_string(),
        })?;

    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EntitlementError::InvalidWebhookPayload {
            message: "missing subscription id".to_string(),
        })?
        .to_string();

    let customer_id = obj
        .get("customer")
        .and_then(|v| v.as_str())
        .ok_or_else(|| EntitlementError::InvalidWebhookPayload {
            message: "missing customer id".to_string(),
        })?
        .to_string();

    let status = obj
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("active")
        .to_string();

    let price_id = obj
        .get("items")
        .and_then(|v| v.get("data"))
        .and_then(|v| v.as_array())
        .and_then(|items| items.first())
        .and_then(|item| item.get("price"))
        .and_then(|price| price.get("id"))
        .and_then(|v| v.as_str())
        .map(String::from);

    let current_period_start = obj
        .get("current_period_start")
        .and_then(|v| v.as_i64())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    let current_period_end = obj
        .get("current_period_end")
        .and_then(|v| v.as_i64())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));

    let cancel_at_period_end = obj
        .get("cancel_at_period_end")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let metadata_user_id = obj
        .get("metadata")
        .and_then(|m| m.get("user_id"))
        .and_then(|v| v.as_str())
        .map(String::from);

    Ok(ProviderSubscriptionData {
        id,
        customer_id,
        status,
        price_id,
        current_period_start,
        current_period_end,
        cancel_at_period_end,
        metadata_user_id,
    })
}

struct SignatureParts {
    timestamp: i64,
    signature: String,
}

fn parse_signature_header(header: &str) -> Result<SignatureParts> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(',') {
        let (key, value) =
            part.split_once('=')
                .ok_or_else(|| EntitlementError::InvalidWebhookPayload {
                    message: "malformed signature header".to_string(),
                })?;

        match key.trim() {
            "t" => timestamp = value.parse().ok(),
            "v1" => signature = Some(value.to_string()),
            // Other scheme versions are fine to ignore.
            _ => {}
        }
    }

    Ok(SignatureParts {
        timestamp: timestamp.ok_or(EntitlementError::InvalidWebhookPayload {
            message: "missing timestamp in signature header".to_string(),
        })?,
        signature: signature.ok_or(EntitlementError::InvalidWebhookPayload {
            message: "missing v1 signature in header".to_string(),
        })?,
    })
}

fn compute_signature(secret: &str, payload: &[u8]) -> Result<String> {
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DowngateError::internal("HMAC key error"))?;
    mac.update(payload);

    Ok(hex::encode(mac.finalize().into_bytes()))
}
