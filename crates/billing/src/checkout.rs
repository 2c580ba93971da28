//! Checkout initiation and completion callback

use std::sync::Arc;
use std::time::Duration;

use jobproof_shared::EntitlementRecord;
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::observation::{Observation, ObservationSource};
use crate::provider::{bounded, BillingProvider, CheckoutRequest};
use crate::query::VerifiedIdentity;
use crate::reconciler::{ReconcileOutcome, Reconciler, SkipReason};

/// Response for creating a checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

pub struct CheckoutService {
    provider: Arc<dyn BillingProvider>,
    reconciler: Arc<Reconciler>,
    price_id: String,
    app_base_url: String,
    timeout: Duration,
}

impl CheckoutService {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        reconciler: Arc<Reconciler>,
        price_id: impl Into<String>,
        app_base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            reconciler,
            price_id: price_id.into(),
            app_base_url: app_base_url.into(),
            timeout,
        }
    }

    /// Start a hosted subscription checkout for the record's user.
    ///
    /// Reuses the linked provider customer, or one found by email, and only
    /// creates a new customer when neither exists.
    pub async fn start_checkout(&self, record: &EntitlementRecord) -> BillingResult<CheckoutResponse> {
        let customer_id = match self
            .reconciler
            .customer_for(record, ObservationSource::CheckoutCallback)
            .await?
        {
            Some(customer_id) => customer_id,
            None => self.create_and_link_customer(record).await?,
        };

        let base_url = self.app_base_url.trim_end_matches('/');
        let request = CheckoutRequest {
            user_id: record.user_id,
            customer_id: customer_id.clone(),
            price_id: self.price_id.clone(),
            success_url: format!(
                "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
                base_url
            ),
            cancel_url: format!("{}/billing/canceled", base_url),
        };

        let session = bounded(
            self.timeout,
            "create_checkout_session",
            self.provider.create_checkout_session(request),
        )
        .await?;

        tracing::info!(
            user_id = %record.user_id,
            customer_id = %customer_id,
            session_id = %session.id,
            "Created checkout session"
        );

        Ok(CheckoutResponse {
            session_id: session.id,
            url: session.url,
        })
    }

    /// Client-reported completion. The session is re-read from the provider
    /// and must belong to the caller.
    pub async fn complete_checkout(
        &self,
        identity: &VerifiedIdentity,
        session_id: &str,
    ) -> BillingResult<ReconcileOutcome> {
        let session = bounded(
            self.timeout,
            "get_checkout_session",
            self.provider.get_checkout_session(session_id),
        )
        .await?
        .ok_or_else(|| BillingError::NotFound(format!("checkout session {}", session_id)))?;

        if session.client_reference_id.as_deref() != Some(identity.user_id.to_string().as_str()) {
            tracing::warn!(
                user_id = %identity.user_id,
                session_id = %session_id,
                "Checkout session belongs to a different user"
            );
            return Err(BillingError::Unauthorized(
                "checkout session does not belong to caller".to_string(),
            ));
        }

        let (true, Some(customer_id), Some(subscription_id)) =
            (session.complete, session.customer_id, session.subscription_id)
        else {
            tracing::info!(
                user_id = %identity.user_id,
                session_id = %session_id,
                "Checkout session not complete yet"
            );
            return Ok(ReconcileOutcome::Skipped(SkipReason::IncompleteCheckout));
        };

        self.reconciler
            .reconcile(
                &Observation::CheckoutCompleted {
                    customer_id,
                    subscription_id,
                },
                ObservationSource::CheckoutCallback,
            )
            .await
    }

    async fn create_and_link_customer(&self, record: &EntitlementRecord) -> BillingResult<String> {
        let customer = bounded(
            self.timeout,
            "create_customer",
            self.provider.create_customer(&record.email, record.user_id),
        )
        .await?;

        // A concurrent checkout may have linked first; the first link wins.
        let linked = self
            .reconciler
            .store()
            .link_customer(record.user_id, &customer.id)
            .await?
            .and_then(|r| r.provider_customer_id)
            .unwrap_or_else(|| customer.id.clone());

        if linked == customer.id {
            tracing::info!(
                user_id = %record.user_id,
                customer_id = %customer.id,
                "Created provider customer"
            );
        }

        Ok(linked)
    }
}
