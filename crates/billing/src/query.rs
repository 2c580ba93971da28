//! Entitlement query service
//!
//! Answers "what can this user do right now?" from a live provider read,
//! falling back to the local trial window only when the user has no billing
//! subscription. Provider trouble never fails the caller: the answer is a
//! conservative snapshot that grants nothing.

use std::sync::Arc;

use jobproof_shared::{EntitlementRecord, EntitlementSnapshot, SubscriptionStatus};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::observation::ObservationSource;
use crate::provider::ProviderSubscription;
use crate::reconciler::Reconciler;

/// Caller identity as verified by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub user_id: Uuid,
    pub email: String,
}

pub struct EntitlementQueryService {
    reconciler: Arc<Reconciler>,
    trial_length: time::Duration,
}

impl EntitlementQueryService {
    pub fn new(reconciler: Arc<Reconciler>, trial_length: time::Duration) -> Self {
        Self {
            reconciler,
            trial_length,
        }
    }

    /// Create the caller's record (starting the trial clock) if missing
    pub async fn bootstrap(&self, identity: &VerifiedIdentity) -> BillingResult<EntitlementRecord> {
        let trial_ends_at = OffsetDateTime::now_utc() + self.trial_length;
        self.reconciler
            .store()
            .ensure_record(identity.user_id, &identity.email, trial_ends_at)
            .await
    }

    /// Point-in-time entitlement for the caller.
    ///
    /// Only a failure to read or create the local record is returned as an
    /// error; provider failures and timeouts produce a degraded snapshot.
    pub async fn get_entitlement(
        &self,
        identity: &VerifiedIdentity,
    ) -> BillingResult<EntitlementSnapshot> {
        let record = self.bootstrap(identity).await?;
        let now = OffsetDateTime::now_utc();

        let customer_id = match self
            .reconciler
            .customer_for(&record, ObservationSource::Query)
            .await
        {
            Ok(customer_id) => customer_id,
            Err(e) if e.is_provider_failure() => {
                tracing::warn!(
                    user_id = %identity.user_id,
                    error = %e,
                    "Billing provider unavailable resolving customer, denying conservatively"
                );
                return Ok(EntitlementSnapshot::conservative(
                    record.provider_customer_id.clone(),
                ));
            }
            Err(e) => return Err(e),
        };

        let Some(customer_id) = customer_id else {
            return Ok(EntitlementSnapshot::from_local_trial(
                record.trial_ends_at,
                None,
                now,
            ));
        };

        let subscription = match self.reconciler.current_subscription(&customer_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(
                    user_id = %identity.user_id,
                    customer_id = %customer_id,
                    error = %e,
                    "Billing provider unavailable reading subscriptions, denying conservatively"
                );
                return Ok(EntitlementSnapshot::conservative(Some(customer_id)));
            }
        };

        // Keep the cached record close to the provider; the snapshot does
        // not depend on this write succeeding.
        if let Err(e) = self
            .reconciler
            .write_back(&record, subscription.as_ref(), ObservationSource::Query)
            .await
        {
            tracing::error!(
                user_id = %identity.user_id,
                error = %e,
                "Failed to write back entitlement after query"
            );
        }

        Ok(snapshot_for(&record, customer_id, subscription.as_ref(), now))
    }
}

/// Project a provider read onto the snapshot returned to clients
pub fn snapshot_for(
    record: &EntitlementRecord,
    customer_id: String,
    subscription: Option<&ProviderSubscription>,
    now: OffsetDateTime,
) -> EntitlementSnapshot {
    let Some(subscription) = subscription else {
        return EntitlementSnapshot::from_local_trial(record.trial_ends_at, Some(customer_id), now);
    };

    match subscription.local_status() {
        SubscriptionStatus::Active => EntitlementSnapshot {
            subscribed: true,
            in_trial: false,
            trial_end: None,
            subscription_end: subscription.current_period_end,
            status: SubscriptionStatus::Active,
            customer_id: Some(customer_id),
            product_id: subscription.product_id.clone(),
            degraded: false,
        },
        SubscriptionStatus::Trialing => EntitlementSnapshot {
            subscribed: true,
            in_trial: true,
            trial_end: subscription.trial_end,
            subscription_end: subscription.trial_end,
            status: SubscriptionStatus::Trialing,
            customer_id: Some(customer_id),
            product_id: subscription.product_id.clone(),
            degraded: false,
        },
        SubscriptionStatus::Inactive => {
            EntitlementSnapshot::from_local_trial(record.trial_ends_at, Some(customer_id), now)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::observation::Observation;
    use crate::store::EntitlementStore;
    use crate::testing::{FakeBillingProvider, InMemoryEntitlementStore};
    use std::time::Duration;
    use time::Duration as TimeDuration;

    struct Harness {
        provider: Arc<FakeBillingProvider>,
        store: Arc<InMemoryEntitlementStore>,
        reconciler: Arc<Reconciler>,
        query: EntitlementQueryService,
    }

    fn harness(timeout: Duration) -> Harness {
        let provider = Arc::new(FakeBillingProvider::new());
        let store = Arc::new(InMemoryEntitlementStore::new());
        let reconciler = Arc::new(Reconciler::new(provider.clone(), store.clone(), timeout));
        let query = EntitlementQueryService::new(reconciler.clone(), TimeDuration::days(7));
        Harness {
            provider,
            store,
            reconciler,
            query,
        }
    }

    fn identity(email: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
        }
    }

    #[tokio::test]
    async fn test_new_user_gets_local_trial() {
        let h = harness(Duration::from_secs(10));
        let who = identity("new@example.com");

        let snapshot = h.query.get_entitlement(&who).await.unwrap();

        assert!(!snapshot.subscribed);
        assert!(snapshot.in_trial);
        assert!(snapshot.trial_end.is_some());
        assert_eq!(snapshot.subscription_end, snapshot.trial_end);
        assert!(snapshot.customer_id.is_none());
        assert!(!snapshot.degraded);
    }

    #[tokio::test]
    async fn test_trial_clock_is_not_restarted() {
        let h = harness(Duration::from_secs(10));
        let who = identity("new@example.com");

        let first = h.query.get_entitlement(&who).await.unwrap();
        let second = h.query.get_entitlement(&who).await.unwrap();
        assert_eq!(first.trial_end, second.trial_end);
    }

    #[tokio::test]
    async fn test_active_subscription_reports_period_end() {
        let h = harness(Duration::from_secs(10));
        let who = identity("pat@example.com");
        let period_end = OffsetDateTime::now_utc() + TimeDuration::days(30);
        h.provider.add_customer("cus_1", "pat@example.com").await;
        h.provider
            .set_subscription("sub_1", "cus_1", "active", Some(period_end), None)
            .await;

        let snapshot = h.query.get_entitlement(&who).await.unwrap();

        assert!(snapshot.subscribed);
        assert!(!snapshot.in_trial);
        assert_eq!(snapshot.subscription_end, Some(period_end));
        assert_eq!(snapshot.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(snapshot.product_id.as_deref(), Some("prod_jobproof"));

        // Written back and linked as a side effect
        let record = h.store.get(who.user_id).await.unwrap().unwrap();
        assert_eq!(record.status, SubscriptionStatus::Active);
        assert_eq!(record.provider_customer_id.as_deref(), Some("cus_1"));
        assert_eq!(record.provider_subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn test_provider_trial_counts_as_access() {
        let h = harness(Duration::from_secs(10));
        let who = identity("pat@example.com");
        let trial_end = OffsetDateTime::now_utc() + TimeDuration::days(3);
        h.provider.add_customer("cus_1", "pat@example.com").await;
        h.provider
            .set_subscription("sub_1", "cus_1", "trialing", None, Some(trial_end))
            .await;

        let snapshot = h.query.get_entitlement(&who).await.unwrap();

        assert!(snapshot.subscribed);
        assert!(snapshot.in_trial);
        assert_eq!(snapshot.trial_end, Some(trial_end));
        assert_eq!(snapshot.subscription_end, Some(trial_end));
        assert_eq!(snapshot.status, SubscriptionStatus::Trialing);
    }

    #[tokio::test]
    async fn test_customer_without_subscription_uses_local_trial() {
        let h = harness(Duration::from_secs(10));
        let who = identity("pat@example.com");
        h.provider.add_customer("cus_1", "pat@example.com").await;
        h.provider
            .set_subscription("sub_old", "cus_1", "canceled", None, None)
            .await;

        let snapshot = h.query.get_entitlement(&who).await.unwrap();

        assert!(!snapshot.subscribed);
        assert!(snapshot.in_trial);
        assert_eq!(snapshot.customer_id.as_deref(), Some("cus_1"));
    }

    #[tokio::test]
    async fn test_provider_outage_denies_conservatively() {
        let h = harness(Duration::from_secs(10));
        let who = identity("pat@example.com");
        h.provider.set_unavailable(true);

        let snapshot = h.query.get_entitlement(&who).await.unwrap();

        assert!(!snapshot.subscribed);
        assert!(!snapshot.in_trial);
        assert!(snapshot.trial_end.is_none());
        assert!(snapshot.degraded);
        assert!(!snapshot.has_full_access(OffsetDateTime::now_utc()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_denies_conservatively() {
        let h = harness(Duration::from_millis(100));
        let who = identity("pat@example.com");
        h.provider.add_customer("cus_1", "pat@example.com").await;
        h.provider
            .set_subscription("sub_1", "cus_1", "active", None, None)
            .await;
        h.provider.set_delay(Duration::from_secs(30));

        let snapshot = h.query.get_entitlement(&who).await.unwrap();

        assert!(!snapshot.subscribed);
        assert!(snapshot.degraded);
    }

    #[tokio::test]
    async fn test_store_failure_fails_the_query() {
        let h = harness(Duration::from_secs(10));
        h.store.set_fail_writes(true);

        assert!(h.query.get_entitlement(&identity("pat@example.com")).await.is_err());
    }

    #[tokio::test]
    async fn test_query_corrects_out_of_order_writes() {
        let h = harness(Duration::from_secs(10));
        let who = identity("pat@example.com");
        h.query.bootstrap(&who).await.unwrap();
        h.provider.add_customer("cus_1", "pat@example.com").await;

        // Provider truth: subscription canceled. Events arrive cancel-first.
        h.provider
            .set_subscription("sub_1", "cus_1", "canceled", None, None)
            .await;
        h.reconciler
            .reconcile(
                &Observation::SubscriptionCanceled {
                    customer_id: "cus_1".to_string(),
                    subscription_id: "sub_1".to_string(),
                },
                ObservationSource::Webhook,
            )
            .await
            .unwrap();
        h.reconciler
            .reconcile(
                &Observation::SubscriptionChanged {
                    customer_id: "cus_1".to_string(),
                    subscription_id: "sub_1".to_string(),
                    provider_status: Some("active".to_string()),
                },
                ObservationSource::Webhook,
            )
            .await
            .unwrap();

        // The cache is transiently wrong
        let stale = h.store.get(who.user_id).await.unwrap().unwrap();
        assert_eq!(stale.status, SubscriptionStatus::Active);

        // The query re-derives from the provider and repairs the cache
        let snapshot = h.query.get_entitlement(&who).await.unwrap();
        assert!(!snapshot.subscribed);
        let repaired = h.store.get(who.user_id).await.unwrap().unwrap();
        assert_eq!(repaired.status, SubscriptionStatus::Inactive);
        assert!(repaired.provider_subscription_id.is_none());
    }
}
