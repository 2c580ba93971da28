//! Reconciler: merges billing-provider truth into the local entitlement record
//!
//! Handlers are stateless and idempotent. Each write sets status and
//! subscription id to values taken from one observation (or one fresh
//! provider read), so concurrent or repeated deliveries for the same user
//! converge without locks. Ordering across observation types is not
//! enforced here; the query path re-reads the provider on every request and
//! corrects whatever a late delivery left behind.

use std::sync::Arc;
use std::time::Duration;

use jobproof_shared::{EntitlementRecord, SubscriptionStatus};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::events::{EntitlementEvent, EntitlementEventType};
use crate::observation::{Observation, ObservationSource};
use crate::provider::{bounded, BillingProvider, ProviderSubscription, SubscriptionLookup};
use crate::store::EntitlementStore;

/// Why an observation was acknowledged without a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No local record for the provider customer, by id or by email
    NoMatchingUser,
    /// The email matches a user already linked to a different customer
    CustomerMismatch,
    /// Cancellation of a subscription that is no longer the stored one
    SupersededSubscription,
    /// Checkout completed but the provider has no such subscription
    IncompleteCheckout,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatchingUser => write!(f, "no_matching_user"),
            Self::CustomerMismatch => write!(f, "customer_mismatch"),
            Self::SupersededSubscription => write!(f, "superseded_subscription"),
            Self::IncompleteCheckout => write!(f, "incomplete_checkout"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        user_id: Uuid,
        status: SubscriptionStatus,
    },
    /// Permanent: redelivery cannot change the result
    Skipped(SkipReason),
}

/// Result of re-reading the provider for one user
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub record: EntitlementRecord,
    /// Current active (or else trialing) subscription
    pub subscription: Option<ProviderSubscription>,
}

pub struct Reconciler {
    provider: Arc<dyn BillingProvider>,
    store: Arc<dyn EntitlementStore>,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(
        provider: Arc<dyn BillingProvider>,
        store: Arc<dyn EntitlementStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn EntitlementStore> {
        &self.store
    }

    /// Apply one observation.
    ///
    /// Provider failures and store write failures are returned as errors so
    /// the delivery mechanism redelivers. A missing local user is a
    /// permanent skip.
    pub async fn reconcile(
        &self,
        observation: &Observation,
        source: ObservationSource,
    ) -> BillingResult<ReconcileOutcome> {
        self.reconcile_event(observation, source, None).await
    }

    /// Same as [`Reconciler::reconcile`], tagging audit entries with the
    /// provider event that carried the observation
    pub async fn reconcile_event(
        &self,
        observation: &Observation,
        source: ObservationSource,
        provider_event_id: Option<&str>,
    ) -> BillingResult<ReconcileOutcome> {
        let customer_id = observation.customer_id();
        let subscription_id = observation.subscription_id();

        let record = match self.resolve_user(customer_id, source).await? {
            Ok(record) => record,
            Err(reason) => {
                tracing::info!(
                    customer_id = %customer_id,
                    subscription_id = %subscription_id,
                    observation = observation.kind(),
                    source = %source,
                    reason = %reason,
                    "Observation skipped"
                );
                self.audit(
                    EntitlementEvent::builder(EntitlementEventType::ObservationSkipped, source)
                        .provider_event(provider_event_id)
                        .customer(customer_id)
                        .subscription(subscription_id)
                        .data(serde_json::json!({
                            "observation": observation.kind(),
                            "reason": reason.to_string(),
                        }))
                        .build(),
                )
                .await;
                return Ok(ReconcileOutcome::Skipped(reason));
            }
        };

        let status = match observation {
            Observation::CheckoutCompleted { .. } => {
                // The completion payload carries no status; ask the provider.
                let subscription = bounded(
                    self.timeout,
                    "get_subscription",
                    self.provider.get_subscription(subscription_id),
                )
                .await?;
                match subscription {
                    Some(subscription) => subscription.local_status(),
                    None => {
                        tracing::warn!(
                            user_id = %record.user_id,
                            subscription_id = %subscription_id,
                            "Checkout completed for a subscription the provider does not know"
                        );
                        return Ok(ReconcileOutcome::Skipped(SkipReason::IncompleteCheckout));
                    }
                }
            }
            Observation::SubscriptionChanged {
                provider_status, ..
            } => SubscriptionStatus::from_provider_status(provider_status.as_deref()),
            Observation::SubscriptionCanceled { .. } => SubscriptionStatus::Inactive,
        };

        let write = if status.is_billing() {
            self.store
                .apply_status(record.user_id, Some(subscription_id), status)
                .await
        } else {
            self.store
                .apply_cancellation(record.user_id, subscription_id)
                .await
        };
        let written = write.map_err(|e| {
            tracing::error!(
                user_id = %record.user_id,
                subscription_id = %subscription_id,
                error = %e,
                "Failed to write entitlement record"
            );
            e
        })?;

        let event = EntitlementEvent::builder(EntitlementEventType::StatusApplied, source)
            .user(record.user_id)
            .provider_event(provider_event_id)
            .customer(customer_id)
            .subscription(subscription_id)
            .data(serde_json::json!({ "observation": observation.kind() }));

        match written {
            Some(updated) => {
                tracing::info!(
                    user_id = %updated.user_id,
                    subscription_id = %subscription_id,
                    status = %updated.status,
                    observation = observation.kind(),
                    source = %source,
                    "Entitlement record reconciled"
                );
                let event_type = if status.is_billing() {
                    EntitlementEventType::StatusApplied
                } else {
                    EntitlementEventType::SubscriptionCanceled
                };
                self.audit(
                    EntitlementEvent {
                        event_type,
                        ..event.resulting_status(updated.status).build()
                    },
                )
                .await;
                Ok(ReconcileOutcome::Applied {
                    user_id: updated.user_id,
                    status: updated.status,
                })
            }
            None if !status.is_billing() => {
                tracing::info!(
                    user_id = %record.user_id,
                    subscription_id = %subscription_id,
                    "Ignoring inactive status for a subscription that has been replaced"
                );
                self.audit(EntitlementEvent {
                    event_type: EntitlementEventType::CancellationSuperseded,
                    ..event.build()
                })
                .await;
                Ok(ReconcileOutcome::Skipped(SkipReason::SupersededSubscription))
            }
            None => Err(BillingError::NotFound(format!(
                "entitlement record for user {} disappeared",
                record.user_id
            ))),
        }
    }

    /// Re-read the provider for one user and overwrite the record with what
    /// it reports. Errors propagate.
    pub async fn refresh_user(
        &self,
        user_id: Uuid,
        source: ObservationSource,
    ) -> BillingResult<RefreshOutcome> {
        let record = self
            .store
            .get(user_id)
            .await?
            .ok_or_else(|| BillingError::NotFound(format!("entitlement record for user {}", user_id)))?;

        let Some(customer_id) = self.customer_for(&record, source).await? else {
            return Ok(RefreshOutcome {
                record,
                subscription: None,
            });
        };

        let subscription = self.current_subscription(&customer_id).await?;
        let record = self.write_back(&record, subscription.as_ref(), source).await?;

        Ok(RefreshOutcome {
            record,
            subscription,
        })
    }

    /// Provider customer for a record: the linked id when there is one,
    /// otherwise a lookup by email that links the result on success.
    pub async fn customer_for(
        &self,
        record: &EntitlementRecord,
        source: ObservationSource,
    ) -> BillingResult<Option<String>> {
        if let Some(customer_id) = &record.provider_customer_id {
            return Ok(Some(customer_id.clone()));
        }

        let customer = bounded(
            self.timeout,
            "find_customer_by_email",
            self.provider.find_customer_by_email(&record.email),
        )
        .await?;

        let Some(customer) = customer else {
            return Ok(None);
        };

        if let Some(owner) = self.store.find_by_customer_id(&customer.id).await? {
            if owner.user_id != record.user_id {
                tracing::warn!(
                    user_id = %record.user_id,
                    owner_id = %owner.user_id,
                    customer_id = %customer.id,
                    "Provider customer found by email is linked to another user"
                );
                return Ok(None);
            }
        }

        self.link(record.user_id, &customer.id, source).await?;
        Ok(Some(customer.id))
    }

    /// The customer's active subscription, or else its trialing one
    pub async fn current_subscription(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<ProviderSubscription>> {
        for lookup in [SubscriptionLookup::Active, SubscriptionLookup::Trialing] {
            let found = bounded(
                self.timeout,
                "find_subscription",
                self.provider.find_subscription(customer_id, lookup),
            )
            .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Overwrite the record with a fresh provider read. No write happens
    /// when the record already agrees.
    pub async fn write_back(
        &self,
        record: &EntitlementRecord,
        subscription: Option<&ProviderSubscription>,
        source: ObservationSource,
    ) -> BillingResult<EntitlementRecord> {
        let (status, subscription_id) = match subscription {
            Some(subscription) => (subscription.local_status(), Some(subscription.id.as_str())),
            None => (SubscriptionStatus::Inactive, None),
        };
        let subscription_id = subscription_id.filter(|_| status.is_billing());

        if record.status == status && record.provider_subscription_id.as_deref() == subscription_id {
            return Ok(record.clone());
        }

        let updated = self
            .store
            .apply_status(record.user_id, subscription_id, status)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("entitlement record for user {}", record.user_id))
            })?;

        tracing::info!(
            user_id = %record.user_id,
            previous_status = %record.status,
            status = %updated.status,
            source = %source,
            "Entitlement record re-synchronized from provider"
        );

        let mut event = EntitlementEvent::builder(EntitlementEventType::StatusApplied, source)
            .user(record.user_id)
            .resulting_status(updated.status)
            .data(serde_json::json!({ "previous_status": record.status.to_string() }));
        if let Some(customer_id) = &updated.provider_customer_id {
            event = event.customer(customer_id.clone());
        }
        if let Some(subscription_id) = subscription_id {
            event = event.subscription(subscription_id);
        }
        self.audit(event.build()).await;

        Ok(updated)
    }

    /// Find the local user for a provider customer: by the persisted id
    /// first, then by the customer's email for a first link.
    async fn resolve_user(
        &self,
        customer_id: &str,
        source: ObservationSource,
    ) -> BillingResult<Result<EntitlementRecord, SkipReason>> {
        if let Some(record) = self.store.find_by_customer_id(customer_id).await? {
            return Ok(Ok(record));
        }

        let customer = bounded(
            self.timeout,
            "get_customer",
            self.provider.get_customer(customer_id),
        )
        .await?;

        let Some(email) = customer
            .filter(|c| !c.deleted)
            .and_then(|c| c.email)
            .filter(|e| !e.trim().is_empty())
        else {
            return Ok(Err(SkipReason::NoMatchingUser));
        };

        let Some(record) = self.store.find_by_email(&email).await? else {
            return Ok(Err(SkipReason::NoMatchingUser));
        };

        match record.provider_customer_id.as_deref() {
            Some(linked) if linked != customer_id => {
                tracing::warn!(
                    user_id = %record.user_id,
                    linked_customer_id = %linked,
                    customer_id = %customer_id,
                    "Email matches a user linked to a different provider customer"
                );
                Ok(Err(SkipReason::CustomerMismatch))
            }
            Some(_) => Ok(Ok(record)),
            None => {
                let linked = self.link(record.user_id, customer_id, source).await?;
                Ok(Ok(linked.unwrap_or(record)))
            }
        }
    }

    async fn link(
        &self,
        user_id: Uuid,
        customer_id: &str,
        source: ObservationSource,
    ) -> BillingResult<Option<EntitlementRecord>> {
        let linked = self.store.link_customer(user_id, customer_id).await?;
        if linked
            .as_ref()
            .is_some_and(|r| r.provider_customer_id.as_deref() == Some(customer_id))
        {
            tracing::info!(
                user_id = %user_id,
                customer_id = %customer_id,
                source = %source,
                "Linked provider customer"
            );
            self.audit(
                EntitlementEvent::builder(EntitlementEventType::CustomerLinked, source)
                    .user(user_id)
                    .customer(customer_id)
                    .build(),
            )
            .await;
        }
        Ok(linked)
    }

    /// Audit failures never fail the write path
    async fn audit(&self, event: EntitlementEvent) {
        if let Err(e) = self.store.record_event(&event).await {
            tracing::warn!(
                event_type = %event.event_type,
                user_id = ?event.user_id,
                error = %e,
                "Failed to record entitlement event"
            );
        }
    }
}
