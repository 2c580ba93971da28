//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    /// Network failure, timeout, rate limiting or a 5xx from the provider
    #[error("Billing provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload malformed: {0}")]
    WebhookPayloadInvalid(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl BillingError {
    /// Failures talking to the billing provider. The delivery mechanism is
    /// expected to retry observations that fail this way.
    pub fn is_provider_failure(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::StripeApi(_))
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(ref request_error) => {
                let status = request_error.http_status;
                if status == 429 || (500..600).contains(&status) {
                    BillingError::ProviderUnavailable(err.to_string())
                } else {
                    BillingError::StripeApi(err.to_string())
                }
            }
            stripe::StripeError::Timeout | stripe::StripeError::ClientError(_) => {
                BillingError::ProviderUnavailable(err.to_string())
            }
            _ => BillingError::StripeApi(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_failure_classification() {
        assert!(BillingError::ProviderUnavailable("timeout".into()).is_provider_failure());
        assert!(BillingError::StripeApi("bad request".into()).is_provider_failure());
        assert!(!BillingError::Database("disk full".into()).is_provider_failure());
        assert!(!BillingError::WebhookSignatureInvalid.is_provider_failure());
    }

    #[test]
    fn test_stripe_timeout_is_unavailable() {
        let err: BillingError = stripe::StripeError::Timeout.into();
        assert!(matches!(err, BillingError::ProviderUnavailable(_)));
    }
}
