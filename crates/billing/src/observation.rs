//! Observations: provider-side facts fed into the reconciler

use serde::{Deserialize, Serialize};

/// A change in billing-provider state, as reported by an event or callback.
///
/// Payload values are hints. The reconciler re-reads the provider where the
/// payload alone cannot be trusted (checkout completion).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    CheckoutCompleted {
        customer_id: String,
        subscription_id: String,
    },
    SubscriptionChanged {
        customer_id: String,
        subscription_id: String,
        provider_status: Option<String>,
    },
    SubscriptionCanceled {
        customer_id: String,
        subscription_id: String,
    },
}

impl Observation {
    pub fn customer_id(&self) -> &str {
        match self {
            Self::CheckoutCompleted { customer_id, .. }
            | Self::SubscriptionChanged { customer_id, .. }
            | Self::SubscriptionCanceled { customer_id, .. } => customer_id,
        }
    }

    pub fn subscription_id(&self) -> &str {
        match self {
            Self::CheckoutCompleted { subscription_id, .. }
            | Self::SubscriptionChanged { subscription_id, .. }
            | Self::SubscriptionCanceled { subscription_id, .. } => subscription_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted { .. } => "checkout_completed",
            Self::SubscriptionChanged { .. } => "subscription_changed",
            Self::SubscriptionCanceled { .. } => "subscription_canceled",
        }
    }
}

/// What triggered a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationSource {
    /// Signed provider event
    Webhook,
    /// Client-reported checkout completion
    CheckoutCallback,
    /// Explicit refresh request from the user
    Refresh,
    /// Write-back from the entitlement query path
    Query,
    /// Maintenance sweep
    Sweep,
}

impl std::fmt::Display for ObservationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::CheckoutCallback => write!(f, "checkout"),
            Self::Refresh => write!(f, "refresh"),
            Self::Query => write!(f, "query"),
            Self::Sweep => write!(f, "sweep"),
        }
    }
}
