//! Stripe client configuration and the Stripe-backed billing provider

use async_trait::async_trait;
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionStatus, Client,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCustomer, Customer, CustomerId,
    ListCustomers, ListSubscriptions, StripeError, Subscription, SubscriptionId,
    SubscriptionStatusFilter,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::provider::{
    BillingProvider, CheckoutRequest, ProviderCheckoutSession, ProviderCustomer,
    ProviderSubscription, SubscriptionLookup,
};

/// Configuration for Stripe billing
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Price of the single paid plan
    pub price_id: String,
    /// Base URL for success/cancel redirects
    pub app_base_url: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("price_id", &self.price_id)
            .field("app_base_url", &self.app_base_url)
            .finish()
    }
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            price_id: std::env::var("STRIPE_PRICE_ID")
                .map_err(|_| BillingError::Config("STRIPE_PRICE_ID not set".to_string()))?,
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

/// Billing provider backed by the Stripe API
#[derive(Clone)]
pub struct StripeProvider {
    client: Client,
}

impl StripeProvider {
    pub fn new(config: &StripeConfig) -> Self {
        Self {
            client: Client::new(&config.secret_key),
        }
    }
}

fn is_not_found(err: &StripeError) -> bool {
    matches!(err, StripeError::Stripe(request_error) if request_error.http_status == 404)
}

fn timestamp(ts: i64) -> Option<OffsetDateTime> {
    if ts <= 0 {
        return None;
    }
    OffsetDateTime::from_unix_timestamp(ts).ok()
}

fn to_customer(customer: Customer) -> ProviderCustomer {
    ProviderCustomer {
        id: customer.id.to_string(),
        email: customer.email,
        deleted: customer.deleted,
    }
}

fn to_subscription(subscription: Subscription) -> ProviderSubscription {
    let product_id = subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .and_then(|price| price.product.as_ref())
        .map(|product| product.id().to_string());

    ProviderSubscription {
        id: subscription.id.to_string(),
        customer_id: subscription.customer.id().to_string(),
        status: subscription.status.as_str().to_string(),
        current_period_end: timestamp(subscription.current_period_end),
        trial_end: subscription.trial_end.and_then(timestamp),
        product_id,
    }
}

fn to_session(session: CheckoutSession) -> ProviderCheckoutSession {
    ProviderCheckoutSession {
        id: session.id.to_string(),
        url: session.url,
        customer_id: session.customer.as_ref().map(|c| c.id().to_string()),
        subscription_id: session.subscription.as_ref().map(|s| s.id().to_string()),
        client_reference_id: session.client_reference_id,
        complete: session.status == Some(CheckoutSessionStatus::Complete),
    }
}

fn parse_customer_id(customer_id: &str) -> BillingResult<CustomerId> {
    customer_id
        .parse::<CustomerId>()
        .map_err(|e| BillingError::InvalidInput(format!("Invalid customer ID: {}", e)))
}

#[async_trait]
impl BillingProvider for StripeProvider {
    async fn find_customer_by_email(&self, email: &str) -> BillingResult<Option<ProviderCustomer>> {
        let mut params = ListCustomers::new();
        params.email = Some(email);
        params.limit = Some(10);

        let customers = Customer::list(&self.client, &params).await?;

        // Oldest live customer wins when an address was used more than once
        Ok(customers
            .data
            .into_iter()
            .filter(|c| !c.deleted)
            .min_by_key(|c| c.created.unwrap_or(i64::MAX))
            .map(to_customer))
    }

    async fn get_customer(&self, customer_id: &str) -> BillingResult<Option<ProviderCustomer>> {
        let Ok(id) = customer_id.parse::<CustomerId>() else {
            return Ok(None);
        };
        match Customer::retrieve(&self.client, &id, &[]).await {
            Ok(customer) => Ok(Some(to_customer(customer))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_subscription(
        &self,
        customer_id: &str,
        lookup: SubscriptionLookup,
    ) -> BillingResult<Option<ProviderSubscription>> {
        let mut params = ListSubscriptions::new();
        params.customer = Some(parse_customer_id(customer_id)?);
        params.status = Some(match lookup {
            SubscriptionLookup::Active => SubscriptionStatusFilter::Active,
            SubscriptionLookup::Trialing => SubscriptionStatusFilter::Trialing,
        });
        params.limit = Some(1);

        let subscriptions = Subscription::list(&self.client, &params).await?;
        Ok(subscriptions.data.into_iter().next().map(to_subscription))
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<ProviderSubscription>> {
        let Ok(id) = subscription_id.parse::<SubscriptionId>() else {
            return Ok(None);
        };
        match Subscription::retrieve(&self.client, &id, &[]).await {
            Ok(subscription) => Ok(Some(to_subscription(subscription))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_customer(&self, email: &str, user_id: Uuid) -> BillingResult<ProviderCustomer> {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("platform".to_string(), "jobproof".to_string());

        let params = CreateCustomer {
            email: Some(email),
            metadata: Some(metadata),
            ..Default::default()
        };

        let customer = Customer::create(&self.client, params).await?;
        Ok(to_customer(customer))
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> BillingResult<ProviderCheckoutSession> {
        let user_id = request.user_id.to_string();
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.clone());

        let params = CreateCheckoutSession {
            customer: Some(parse_customer_id(&request.customer_id)?),
            client_reference_id: Some(&user_id),
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(vec![CreateCheckoutSessionLineItems {
                price: Some(request.price_id.clone()),
                quantity: Some(1),
                ..Default::default()
            }]),
            success_url: Some(&request.success_url),
            cancel_url: Some(&request.cancel_url),
            metadata: Some(metadata),
            allow_promotion_codes: Some(true),
            ..Default::default()
        };

        let session = CheckoutSession::create(&self.client, params).await?;
        Ok(to_session(session))
    }

    async fn get_checkout_session(
        &self,
        session_id: &str,
    ) -> BillingResult<Option<ProviderCheckoutSession>> {
        let Ok(id) = session_id.parse::<CheckoutSessionId>() else {
            return Ok(None);
        };
        match CheckoutSession::retrieve(&self.client, &id, &[]).await {
            Ok(session) => Ok(Some(to_session(session))),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_redacts_secrets() {
        let config = StripeConfig {
            secret_key: "sk_test_secret".to_string(),
            webhook_secret: "whsec_secret".to_string(),
            price_id: "price_123".to_string(),
            app_base_url: "https://app.example.test".to_string(),
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk_test_secret"));
        assert!(!rendered.contains("whsec_secret"));
        assert!(rendered.contains("price_123"));
    }

    #[test]
    fn test_zero_timestamp_is_absent() {
        assert!(timestamp(0).is_none());
        assert_eq!(timestamp(1_700_000_000).map(|t| t.year()), Some(2023));
    }
}
