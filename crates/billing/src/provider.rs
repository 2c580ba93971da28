//! Billing provider seam
//!
//! Everything the engine needs from the billing provider, expressed in
//! provider-neutral types. The Stripe implementation lives in `client.rs`;
//! tests use the in-memory fake from `testing.rs`.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use jobproof_shared::SubscriptionStatus;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// A provider customer, joined to a local user by email on first link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCustomer {
    pub id: String,
    pub email: Option<String>,
    pub deleted: bool,
}

/// Provider view of one subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    /// Raw provider status string (`active`, `trialing`, `past_due`, ...)
    pub status: String,
    pub current_period_end: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub product_id: Option<String>,
}

impl ProviderSubscription {
    /// Local status for this subscription per the provider status mapping
    pub fn local_status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_provider_status(Some(&self.status))
    }
}

/// Which subscriptions to look for on a customer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionLookup {
    Active,
    Trialing,
}

impl std::fmt::Display for SubscriptionLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Trialing => write!(f, "trialing"),
        }
    }
}

/// Parameters for starting a hosted checkout
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub customer_id: String,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// Provider view of a checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCheckoutSession {
    pub id: String,
    pub url: Option<String>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub client_reference_id: Option<String>,
    pub complete: bool,
}

/// Operations against the billing provider.
///
/// Lookups that find nothing return `Ok(None)`; `Err` is reserved for
/// failures to ask (network, timeout, provider errors).
#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<ProviderCustomer>>;

    async fn get_customer(&self, customer_id: &str) -> BillingResult<Option<ProviderCustomer>>;

    /// First subscription of the customer in the given state, if any
    async fn find_subscription(
        &self,
        customer_id: &str,
        lookup: SubscriptionLookup,
    ) -> BillingResult<Option<ProviderSubscription>>;

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<ProviderSubscription>>;

    async fn create_customer(&self, email: &str, user_id: Uuid) -> BillingResult<ProviderCustomer>;

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<ProviderCheckoutSession>;

    async fn get_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<Option<ProviderCheckoutSession>>;
}

/// Run a provider call with a deadline. An elapsed deadline is reported as
/// `ProviderUnavailable` so callers treat it like any other outage.
pub async fn bounded<T, F>(timeout: Duration, operation: &str, fut: F) -> BillingResult<T>
where
    F: Future<Output = BillingResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation = %operation,
                timeout_ms = timeout.as_millis() as u64,
                "Billing provider call timed out"
            );
            Err(BillingError::ProviderUnavailable(format!(
                "{} timed out after {:?}",
                operation, timeout
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_through_result() {
        let result = bounded(Duration::from_secs(1), "noop", async { Ok::<_, BillingError>(7) }).await;
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out_as_unavailable() {
        let result: BillingResult<()> = bounded(Duration::from_millis(50), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(BillingError::ProviderUnavailable(_))));
    }

    #[test]
    fn test_subscription_local_status() {
        let mut sub = ProviderSubscription {
            id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            status: "trialing".to_string(),
            current_period_end: None,
            trial_end: None,
            product_id: None,
        };
        assert_eq!(sub.local_status(), SubscriptionStatus::Trialing);
        sub.status = "unpaid".to_string();
        assert_eq!(sub.local_status(), SubscriptionStatus::Inactive);
    }
}
