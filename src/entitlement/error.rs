//! Entitlement-specific error types.
//!
//! These carry more context than the crate-level error and convert into
//! `DowngateError` for HTTP responses.

use crate::error::DowngateError;
use chrono::{DateTime, Utc};
use std::fmt;

/// Errors raised by the entitlement core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntitlementError {
    /// No subscription grants the user download access right now.
    NoSubscription { user_id: String },

    /// The user's daily download quota is exhausted.
    LimitReached {
        user_id: String,
        limit: u32,
        resets_at: DateTime<Utc>,
    },

    /// An active subscription references a plan the directory doesn't know.
    PlanNotFound { plan_id: String },

    /// Webhook signature is invalid.
    InvalidWebhookSignature,

    /// Webhook timestamp is outside the accepted window (replay protection).
    WebhookTimestampExpired { age_seconds: i64 },

    /// Webhook event data is malformed.
    InvalidWebhookPayload { message: String },
}

impl fmt::Display for EntitlementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSubscription { user_id } => {
                write!(f, "No active subscription for user '{}'", user_id)
            }
            Self::LimitReached {
                user_id, limit, ..
            } => {
                write!(
                    f,
                    "User '{}' reached the daily download limit of {}",
                    user_id, limit
                )
            }
            Self::PlanNotFound { plan_id } => {
                write!(f, "Plan not found: {}", plan_id)
            }
            Self::InvalidWebhookSignature => {
                write!(f, "Invalid webhook signature")
            }
            Self::WebhookTimestampExpired { age_seconds } => {
                write!(f, "Webhook timestamp expired ({} seconds old)", age_seconds)
            }
            Self::InvalidWebhookPayload { message } => {
                write!(f, "Invalid webhook payload: {}", message)
            }
        }
    }
}

impl std::error::Error for EntitlementError {}

impl From<EntitlementError> for DowngateError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::NoSubscription { .. } => DowngateError::NoSubscription,
            EntitlementError::LimitReached { resets_at, .. } => {
                DowngateError::LimitReached { resets_at }
            }
            // A dangling plan reference is a data inconsistency, not a
            // client mistake; never turned into a fabricated decision.
            EntitlementError::PlanNotFound { plan_id } => {
                DowngateError::internal(format!("Subscription references unknown plan: {}", plan_id))
            }
            EntitlementError::InvalidWebhookSignature => {
                DowngateError::WebhookRejected("invalid signature".to_string())
            }
            EntitlementError::WebhookTimestampExpired { age_seconds } => {
                DowngateError::WebhookRejected(format!("timestamp too old ({}s)", age_seconds))
            }
            EntitlementError::InvalidWebhookPayload { message } => {
                DowngateError::WebhookRejected(format!("malformed payload: {}", message))
            }
        }
    }
}
