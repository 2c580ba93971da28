//! Common types used across JobProof

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Coarse local subscription status stored on the entitlement record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::Type), sqlx(type_name = "VARCHAR", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Inactive,
    Trialing,
    Active,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Inactive
    }
}

impl SubscriptionStatus {
    /// Map a billing-provider status string onto the local enum.
    ///
    /// Only `active` and `trialing` grant anything; canceled, past_due,
    /// unpaid, unknown and absent statuses all collapse to `Inactive`.
    pub fn from_provider_status(status: Option<&str>) -> Self {
        match status.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("active") => Self::Active,
            Some("trialing") => Self::Trialing,
            _ => Self::Inactive,
        }
    }

    /// Whether a provider subscription is currently billing (or trialing) for this status
    pub fn is_billing(&self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Trialing => write!(f, "trialing"),
            Self::Active => write!(f, "active"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inactive" => Ok(Self::Inactive),
            "trialing" => Ok(Self::Trialing),
            "active" => Ok(Self::Active),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

// =============================================================================
// Entitlement Record (server-owned, one row per user)
// =============================================================================

/// Persisted entitlement state for a single user.
///
/// Written only by the server. `trial_ends_at` is set once when the row is
/// created; `provider_customer_id` is set on first link and never cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct EntitlementRecord {
    pub user_id: Uuid,
    pub email: String,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub updated_at: OffsetDateTime,
}

impl EntitlementRecord {
    /// A freshly bootstrapped record: trial clock started, no provider linkage
    pub fn new_trial(user_id: Uuid, email: &str, trial_ends_at: OffsetDateTime) -> Self {
        Self {
            user_id,
            email: normalize_email(email),
            trial_ends_at: Some(trial_ends_at),
            provider_customer_id: None,
            provider_subscription_id: None,
            status: SubscriptionStatus::Inactive,
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    /// `provider_subscription_id` non-null implies a billing status
    pub fn satisfies_invariants(&self) -> bool {
        self.provider_subscription_id.is_none() || self.status.is_billing()
    }

    /// Whether the local (pre-payment) trial is still running at `now`
    pub fn local_trial_active(&self, now: OffsetDateTime) -> bool {
        self.trial_ends_at.is_some_and(|end| now < end)
    }
}

/// Emails are the join key with the billing provider, so compare them normalised
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// =============================================================================
// Entitlement Snapshot (transient, returned to clients)
// =============================================================================

/// Point-in-time view of a user's entitlement.
///
/// Computed fresh for every query and never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    pub subscribed: bool,
    pub in_trial: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub trial_end: Option<OffsetDateTime>,
    /// Current billing period end for active subscriptions, trial end otherwise
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub subscription_end: Option<OffsetDateTime>,
    #[serde(default)]
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    /// Set when the provider could not be consulted and access was denied conservatively
    #[serde(default)]
    pub degraded: bool,
}

impl EntitlementSnapshot {
    /// The answer returned when the provider cannot be reached: deny, don't guess
    pub fn conservative(customer_id: Option<String>) -> Self {
        Self {
            subscribed: false,
            in_trial: false,
            trial_end: None,
            subscription_end: None,
            status: SubscriptionStatus::Inactive,
            customer_id,
            product_id: None,
            degraded: true,
        }
    }

    /// Snapshot derived only from the locally stored trial window
    pub fn from_local_trial(
        trial_ends_at: Option<OffsetDateTime>,
        customer_id: Option<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            subscribed: false,
            in_trial: trial_ends_at.is_some_and(|end| now < end),
            trial_end: trial_ends_at,
            subscription_end: trial_ends_at,
            status: SubscriptionStatus::Inactive,
            customer_id,
            product_id: None,
            degraded: false,
        }
    }

    /// Whether every feature is unlocked at `now`.
    ///
    /// A running trial only counts while its end is known and in the future.
    pub fn has_full_access(&self, now: OffsetDateTime) -> bool {
        self.subscribed || (self.in_trial && self.trial_end.is_some_and(|end| now < end))
    }
}
