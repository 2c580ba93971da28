//! Webhook event ledger
//!
//! Claims each verified provider event id before processing it and records
//! how processing ended. Events that finished with anything other than
//! `error` are acknowledged on redelivery without running again; errored or
//! interrupted events stay claimable so at-least-once delivery still works.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::error::BillingResult;

/// Terminal (or in-flight) state of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingResult {
    Processing,
    /// Store write applied
    Success,
    /// Permanently skipped (no matching user, superseded subscription)
    Skipped,
    /// Event type the engine does not consume
    Ignored,
    /// Failed and should be redelivered
    Error,
}

impl ProcessingResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Ignored => "ignored",
            Self::Error => "error",
        }
    }

    /// Whether redelivery of an event in this state should be processed again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Processing | Self::Error)
    }
}

impl std::fmt::Display for ProcessingResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[async_trait]
pub trait WebhookLedger: Send + Sync {
    /// Claim `event_id` for processing. Returns `false` when the event has
    /// already been handled and must only be acknowledged.
    async fn claim(&self, event_id: &str, event_type: &str) -> BillingResult<bool>;

    async fn finish(
        &self,
        event_id: &str,
        result: ProcessingResult,
        error_message: Option<&str>,
    ) -> BillingResult<()>;
}

/// Postgres ledger over `billing_webhook_events`
#[derive(Clone)]
pub struct PgWebhookLedger {
    pool: PgPool,
}

impl PgWebhookLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookLedger for PgWebhookLedger {
    async fn claim(&self, event_id: &str, event_type: &str) -> BillingResult<bool> {
        // A crashed or failed attempt leaves 'processing' or 'error' behind.
        // Both may be re-claimed; handlers are idempotent.
        let claimed: Option<(i32,)> = sqlx::query_as(
            r#"
            INSERT INTO billing_webhook_events (provider_event_id, event_type, processing_result)
            VALUES ($1, $2, 'processing')
            ON CONFLICT (provider_event_id) DO UPDATE SET
                processing_result = 'processing',
                attempts = billing_webhook_events.attempts + 1,
                processed_at = NOW()
            WHERE billing_webhook_events.processing_result IN ('processing', 'error')
            RETURNING attempts
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((attempts,)) = claimed {
            if attempts > 1 {
                tracing::info!(
                    event_id = %event_id,
                    attempts = attempts,
                    "Re-processing redelivered webhook event"
                );
            }
            return Ok(true);
        }

        Ok(false)
    }

    async fn finish(
        &self,
        event_id: &str,
        result: ProcessingResult,
        error_message: Option<&str>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE billing_webhook_events
            SET processing_result = $2, error_message = $3, processed_at = NOW()
            WHERE provider_event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(result.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
