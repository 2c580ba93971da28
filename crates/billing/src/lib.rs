//! JobProof Billing
//!
//! Keeps each user's entitlement record in step with the billing provider:
//! - Webhook verification and translation into observations
//! - Reconciliation of observations into the entitlement record store
//! - Live entitlement queries with conservative fallback
//! - Checkout initiation and completion
//! - Webhook ledger and entitlement audit trail

pub mod checkout;
pub mod client;
pub mod error;
pub mod events;
pub mod ledger;
pub mod observation;
pub mod provider;
pub mod query;
pub mod reconciler;
pub mod store;
pub mod webhooks;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

pub use checkout::{CheckoutResponse, CheckoutService};
pub use client::{StripeConfig, StripeProvider};
pub use error::{BillingError, BillingResult};
pub use events::{EntitlementEvent, EntitlementEventType};
pub use ledger::{PgWebhookLedger, ProcessingResult, WebhookLedger};
pub use observation::{Observation, ObservationSource};
pub use provider::{BillingProvider, ProviderSubscription};
pub use query::{snapshot_for, EntitlementQueryService, VerifiedIdentity};
pub use reconciler::{ReconcileOutcome, Reconciler, RefreshOutcome, SkipReason};
pub use store::{EntitlementStore, PgEntitlementStore};
pub use webhooks::{parse_observation, WebhookEnvelope, WebhookVerifier};

/// Tunables for the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Deadline for every billing provider call
    pub provider_timeout: Duration,
    /// Length of the local trial started at first sign-in
    pub trial_length: time::Duration,
    /// Allowed age of a webhook signature timestamp
    pub webhook_tolerance_secs: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(10),
            trial_length: time::Duration::days(7),
            webhook_tolerance_secs: webhooks::DEFAULT_TOLERANCE_SECS,
        }
    }
}

/// How an inbound webhook ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Already handled on an earlier delivery
    Duplicate,
    /// Event type the engine does not consume
    Ignored,
    Reconciled(ReconcileOutcome),
}

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub reconciler: Arc<Reconciler>,
    pub query: EntitlementQueryService,
    pub checkout: CheckoutService,
    verifier: WebhookVerifier,
    ledger: Arc<dyn WebhookLedger>,
}

impl BillingService {
    /// Stripe provider with Postgres store and ledger
    pub fn new(config: StripeConfig, pool: PgPool, settings: EngineSettings) -> Self {
        let provider: Arc<dyn BillingProvider> = Arc::new(StripeProvider::new(&config));
        let store: Arc<dyn EntitlementStore> = Arc::new(PgEntitlementStore::new(pool.clone()));
        let ledger: Arc<dyn WebhookLedger> = Arc::new(PgWebhookLedger::new(pool));
        Self::from_parts(provider, store, ledger, &config, settings)
    }

    pub fn from_parts(
        provider: Arc<dyn BillingProvider>,
        store: Arc<dyn EntitlementStore>,
        ledger: Arc<dyn WebhookLedger>,
        config: &StripeConfig,
        settings: EngineSettings,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            provider.clone(),
            store,
            settings.provider_timeout,
        ));
        let query = EntitlementQueryService::new(reconciler.clone(), settings.trial_length);
        let checkout = CheckoutService::new(
            provider,
            reconciler.clone(),
            config.price_id.clone(),
            config.app_base_url.clone(),
            settings.provider_timeout,
        );
        let verifier = WebhookVerifier::new(
            config.webhook_secret.clone(),
            settings.webhook_tolerance_secs,
        );

        Self {
            reconciler,
            query,
            checkout,
            verifier,
            ledger,
        }
    }

    /// Verify, de-duplicate and reconcile one inbound provider event.
    ///
    /// `Ok` means the delivery may be acknowledged. Signature and payload
    /// errors must be rejected without retry; every other error asks the
    /// provider to redeliver.
    pub async fn handle_webhook(
        &self,
        payload: &str,
        signature: &str,
    ) -> BillingResult<WebhookOutcome> {
        let event = self.verifier.verify(payload, signature)?;

        if !self.ledger.claim(&event.id, &event.event_type).await? {
            tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "Duplicate webhook event, already processed"
            );
            return Ok(WebhookOutcome::Duplicate);
        }

        let result = match webhooks::parse_observation(&event) {
            Ok(None) => Ok(WebhookOutcome::Ignored),
            Ok(Some(observation)) => self
                .reconciler
                .reconcile_event(&observation, ObservationSource::Webhook, Some(&event.id))
                .await
                .map(WebhookOutcome::Reconciled),
            Err(e) => Err(e),
        };

        let (processing_result, error_message) = match &result {
            Ok(WebhookOutcome::Ignored) => (ProcessingResult::Ignored, None),
            Ok(WebhookOutcome::Reconciled(ReconcileOutcome::Skipped(reason))) => {
                (ProcessingResult::Skipped, Some(reason.to_string()))
            }
            Ok(_) => (ProcessingResult::Success, None),
            Err(e) => (ProcessingResult::Error, Some(e.to_string())),
        };

        if let Err(e) = self
            .ledger
            .finish(&event.id, processing_result, error_message.as_deref())
            .await
        {
            tracing::error!(
                event_id = %event.id,
                processing_result = %processing_result,
                error = %e,
                "Failed to record webhook processing result"
            );
        }

        match &result {
            Ok(outcome) => tracing::info!(
                event_id = %event.id,
                event_type = %event.event_type,
                outcome = ?outcome,
                "Webhook event processed"
            ),
            Err(e) => tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "Webhook event processing failed"
            ),
        }

        result
    }
}
