//! Entitlement record store
//!
//! One row per user in `entitlement_records`. Every write sets fields to
//! values taken from a single observation; nothing is incremented or merged,
//! so concurrent writers for the same user need no locks.

use async_trait::async_trait;
use jobproof_shared::{normalize_email, EntitlementRecord, SubscriptionStatus};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::events::{self, EntitlementEvent};

/// Persistence for entitlement records and their audit trail
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Create the user's record with a fresh trial if it does not exist yet.
    /// An existing record keeps its trial timing and provider linkage.
    async fn ensure_record(
        &self,
        user_id: Uuid,
        email: &str,
        trial_ends_at: OffsetDateTime,
    ) -> BillingResult<EntitlementRecord>;

    async fn get(&self, user_id: Uuid) -> BillingResult<Option<EntitlementRecord>>;

    /// Case-insensitive email lookup, oldest record first
    async fn find_by_email(&self, email: &str) -> BillingResult<Option<EntitlementRecord>>;

    async fn find_by_customer_id(&self, customer_id: &str)
        -> BillingResult<Option<EntitlementRecord>>;

    /// Persist the provider customer id. The first link wins and is never
    /// replaced or cleared.
    async fn link_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> BillingResult<Option<EntitlementRecord>>;

    /// Overwrite status and subscription id. `Inactive` always clears the
    /// subscription id.
    async fn apply_status(
        &self,
        user_id: Uuid,
        subscription_id: Option<&str>,
        status: SubscriptionStatus,
    ) -> BillingResult<Option<EntitlementRecord>>;

    /// Mark the user inactive, but only if `subscription_id` is the stored
    /// subscription (or none is stored). Returns `None` when the stored
    /// subscription has since been replaced.
    async fn apply_cancellation(
        &self,
        user_id: Uuid,
        subscription_id: &str,
    ) -> BillingResult<Option<EntitlementRecord>>;

    /// Records that carry a provider customer id
    async fn list_linked(&self) -> BillingResult<Vec<EntitlementRecord>>;

    /// Append to the audit trail
    async fn record_event(&self, event: &EntitlementEvent) -> BillingResult<()>;
}

const RECORD_COLUMNS: &str = "user_id, email, trial_ends_at, provider_customer_id, \
     provider_subscription_id, status, updated_at";

/// Postgres-backed store
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn ensure_record(
        &self,
        user_id: Uuid,
        email: &str,
        trial_ends_at: OffsetDateTime,
    ) -> BillingResult<EntitlementRecord> {
        let email = normalize_email(email);

        // Keep the stored email current so the first-link fallback uses the
        // address the user signs in with today. Trial timing is untouched.
        let record: EntitlementRecord = sqlx::query_as(&format!(
            r#"
            INSERT INTO entitlement_records (user_id, email, trial_ends_at, status)
            VALUES ($1, $2, $3, 'inactive')
            ON CONFLICT (user_id) DO UPDATE
                SET email = EXCLUDED.email
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&email)
        .bind(trial_ends_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get(&self, user_id: Uuid) -> BillingResult<Option<EntitlementRecord>> {
        let record = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM entitlement_records WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_email(&self, email: &str) -> BillingResult<Option<EntitlementRecord>> {
        let record = sqlx::query_as(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM entitlement_records
            WHERE LOWER(email) = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<EntitlementRecord>> {
        let record = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM entitlement_records WHERE provider_customer_id = $1"
        ))
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn link_customer(
        &self,
        user_id: Uuid,
        customer_id: &str,
    ) -> BillingResult<Option<EntitlementRecord>> {
        let record = sqlx::query_as(&format!(
            r#"
            UPDATE entitlement_records
            SET provider_customer_id = COALESCE(provider_customer_id, $2),
                updated_at = CASE WHEN provider_customer_id IS NULL THEN NOW() ELSE updated_at END
            WHERE user_id = $1
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn apply_status(
        &self,
        user_id: Uuid,
        subscription_id: Option<&str>,
        status: SubscriptionStatus,
    ) -> BillingResult<Option<EntitlementRecord>> {
        let subscription_id = if status.is_billing() {
            subscription_id
        } else {
            None
        };

        // updated_at only moves when something changed, so replaying an
        // observation leaves the row byte-identical
        let record = sqlx::query_as(&format!(
            r#"
            UPDATE entitlement_records
            SET status = $2,
                provider_subscription_id = $3,
                updated_at = CASE
                    WHEN status IS DISTINCT FROM $2
                      OR provider_subscription_id IS DISTINCT FROM $3
                    THEN NOW() ELSE updated_at END
            WHERE user_id = $1
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(status)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn apply_cancellation(
        &self,
        user_id: Uuid,
        subscription_id: &str,
    ) -> BillingResult<Option<EntitlementRecord>> {
        let record = sqlx::query_as(&format!(
            r#"
            UPDATE entitlement_records
            SET status = 'inactive',
                provider_subscription_id = NULL,
                updated_at = CASE
                    WHEN status <> 'inactive' OR provider_subscription_id IS NOT NULL
                    THEN NOW() ELSE updated_at END
            WHERE user_id = $1
              AND (provider_subscription_id IS NULL OR provider_subscription_id = $2)
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn list_linked(&self) -> BillingResult<Vec<EntitlementRecord>> {
        let records = sqlx::query_as(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM entitlement_records
            WHERE provider_customer_id IS NOT NULL
            ORDER BY created_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    async fn record_event(&self, event: &EntitlementEvent) -> BillingResult<()> {
        events::insert_event(&self.pool, event).await?;
        Ok(())
    }
}
