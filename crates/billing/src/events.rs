//! Entitlement Events Module
//!
//! Append-only audit trail of reconciler activity. Answers "why does this
//! user have (or not have) access?" without replaying provider history:
//! every write, every skip and the observation that caused it.

use jobproof_shared::SubscriptionStatus;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::observation::ObservationSource;

/// Types of entitlement events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntitlementEventType {
    RecordCreated,
    CustomerLinked,
    StatusApplied,
    SubscriptionCanceled,
    /// Cancellation for a subscription that is no longer the stored one
    CancellationSuperseded,
    ObservationSkipped,
}

impl std::fmt::Display for EntitlementEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RecordCreated => "RECORD_CREATED",
            Self::CustomerLinked => "CUSTOMER_LINKED",
            Self::StatusApplied => "STATUS_APPLIED",
            Self::SubscriptionCanceled => "SUBSCRIPTION_CANCELED",
            Self::CancellationSuperseded => "CANCELLATION_SUPERSEDED",
            Self::ObservationSkipped => "OBSERVATION_SKIPPED",
        };
        write!(f, "{}", s)
    }
}

/// An event waiting to be appended
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitlementEvent {
    pub user_id: Option<Uuid>,
    pub event_type: EntitlementEventType,
    pub source: ObservationSource,
    pub event_data: serde_json::Value,
    pub provider_event_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub resulting_status: Option<SubscriptionStatus>,
}

impl EntitlementEvent {
    pub fn builder(event_type: EntitlementEventType, source: ObservationSource) -> EntitlementEventBuilder {
        EntitlementEventBuilder::new(event_type, source)
    }
}

/// A stored event row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntitlementEventRow {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub source: String,
    pub event_data: serde_json::Value,
    pub provider_event_id: Option<String>,
    pub provider_customer_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub resulting_status: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Builder for entitlement events
pub struct EntitlementEventBuilder {
    event: EntitlementEvent,
}

impl EntitlementEventBuilder {
    pub fn new(event_type: EntitlementEventType, source: ObservationSource) -> Self {
        Self {
            event: EntitlementEvent {
                user_id: None,
                event_type,
                source,
                event_data: serde_json::json!({}),
                provider_event_id: None,
                provider_customer_id: None,
                provider_subscription_id: None,
                resulting_status: None,
            },
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.event.user_id = Some(user_id);
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event.event_data = data;
        self
    }

    pub fn provider_event(mut self, event_id: Option<&str>) -> Self {
        self.event.provider_event_id = event_id.map(str::to_string);
        self
    }

    pub fn customer(mut self, customer_id: impl Into<String>) -> Self {
        self.event.provider_customer_id = Some(customer_id.into());
        self
    }

    pub fn subscription(mut self, subscription_id: impl Into<String>) -> Self {
        self.event.provider_subscription_id = Some(subscription_id.into());
        self
    }

    pub fn resulting_status(mut self, status: SubscriptionStatus) -> Self {
        self.event.resulting_status = Some(status);
        self
    }

    pub fn build(self) -> EntitlementEvent {
        self.event
    }
}

/// Append one event
pub async fn insert_event(pool: &PgPool, event: &EntitlementEvent) -> BillingResult<Uuid> {
    let id: (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO entitlement_events (
            user_id,
            event_type,
            source,
            event_data,
            provider_event_id,
            provider_customer_id,
            provider_subscription_id,
            resulting_status
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id
        "#,
    )
    .bind(event.user_id)
    .bind(event.event_type.to_string())
    .bind(event.source.to_string())
    .bind(&event.event_data)
    .bind(&event.provider_event_id)
    .bind(&event.provider_customer_id)
    .bind(&event.provider_subscription_id)
    .bind(event.resulting_status.map(|s| s.to_string()))
    .fetch_one(pool)
    .await?;

    Ok(id.0)
}

/// Most recent events for a user, newest first
pub async fn events_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
) -> BillingResult<Vec<EntitlementEventRow>> {
    let rows = sqlx::query_as(
        r#"
        SELECT
            id,
            user_id,
            event_type,
            source,
            event_data,
            provider_event_id,
            provider_customer_id,
            provider_subscription_id,
            resulting_status,
            created_at
        FROM entitlement_events
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
