//! Entitlement Reconciliation
//!
//! Re-derives every linked user's entitlement from the billing provider and
//! fixes records that drifted (missed or misordered webhooks).
//!
//! ## Usage
//! ```bash
//! # Dry run (report drift without writing)
//! cargo run --bin reconcile-entitlements
//!
//! # Apply fixes
//! cargo run --bin reconcile-entitlements -- --apply
//!
//! # Show the audit trail for one user
//! cargo run --bin reconcile-entitlements -- --history <user_id>
//! ```
//!
//! ## Environment Variables
//! - DATABASE_URL
//! - STRIPE_SECRET_KEY, STRIPE_WEBHOOK_SECRET, STRIPE_PRICE_ID
//! - PROVIDER_TIMEOUT_SECS (default 10)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use jobproof_api::telemetry;
use jobproof_billing::events::events_for_user;
use jobproof_billing::{
    ObservationSource, PgEntitlementStore, ProviderSubscription, Reconciler, StripeConfig,
    StripeProvider,
};
use jobproof_shared::{create_pool, EntitlementRecord, SubscriptionStatus};
use uuid::Uuid;

const HISTORY_LIMIT: i64 = 50;

#[derive(Debug)]
struct Drift {
    user_id: Uuid,
    email: String,
    current: SubscriptionStatus,
    expected: SubscriptionStatus,
    subscription_id: Option<String>,
}

enum Mode {
    DryRun,
    Apply,
    History(Uuid),
}

fn parse_args(args: &[String]) -> anyhow::Result<Mode> {
    match args {
        [] => Ok(Mode::DryRun),
        [flag] if flag == "--apply" => Ok(Mode::Apply),
        [flag] if flag == "--dry-run" => Ok(Mode::DryRun),
        [flag, user_id] if flag == "--history" => Ok(Mode::History(
            user_id.parse().context("--history expects a user id")?,
        )),
        _ => bail!("usage: reconcile-entitlements [--apply | --dry-run | --history <user_id>]"),
    }
}

fn expected_state(subscription: Option<&ProviderSubscription>) -> (SubscriptionStatus, Option<String>) {
    match subscription {
        Some(sub) if sub.local_status().is_billing() => (sub.local_status(), Some(sub.id.clone())),
        _ => (SubscriptionStatus::Inactive, None),
    }
}

fn drift_for(record: &EntitlementRecord, subscription: Option<&ProviderSubscription>) -> Option<Drift> {
    let (expected, subscription_id) = expected_state(subscription);
    if record.status == expected && record.provider_subscription_id == subscription_id {
        return None;
    }
    Some(Drift {
        user_id: record.user_id,
        email: record.email.clone(),
        current: record.status,
        expected,
        subscription_id,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_args(&args)?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url, 2)
        .await
        .context("failed to connect to database")?;

    if let Mode::History(user_id) = mode {
        let events = events_for_user(&pool, user_id, HISTORY_LIMIT).await?;
        println!("Entitlement history for {} ({} events)", user_id, events.len());
        for event in events {
            println!(
                "  {}  {:<24} {:<9} status={:<9} customer={} subscription={}",
                event.created_at,
                event.event_type,
                event.source,
                event.resulting_status.as_deref().unwrap_or("-"),
                event.provider_customer_id.as_deref().unwrap_or("-"),
                event.provider_subscription_id.as_deref().unwrap_or("-"),
            );
        }
        return Ok(());
    }

    let apply = matches!(mode, Mode::Apply);
    if apply {
        println!("LIVE MODE - drifted records will be overwritten\n");
    } else {
        println!("DRY RUN - no changes will be applied (use --apply)\n");
    }

    let timeout_secs = std::env::var("PROVIDER_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|secs: &u64| *secs > 0)
        .unwrap_or(10);

    let stripe_config = StripeConfig::from_env().context("Stripe configuration")?;
    let provider = Arc::new(StripeProvider::new(&stripe_config));
    let store = Arc::new(PgEntitlementStore::new(pool));
    let reconciler = Reconciler::new(provider, store, Duration::from_secs(timeout_secs));

    let records = reconciler.store().list_linked().await?;
    println!("Checking {} linked records", records.len());

    let mut drifted = Vec::new();
    let mut failures = 0usize;

    for record in &records {
        let Some(customer_id) = record.provider_customer_id.as_deref() else {
            continue;
        };

        let subscription = match reconciler.current_subscription(customer_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    user_id = %record.user_id,
                    customer_id = %customer_id,
                    error = %e,
                    "Provider lookup failed, skipping record"
                );
                continue;
            }
        };

        let Some(drift) = drift_for(record, subscription.as_ref()) else {
            continue;
        };

        println!(
            "  {} <{}>: {} -> {} (subscription {})",
            drift.user_id,
            drift.email,
            drift.current,
            drift.expected,
            drift.subscription_id.as_deref().unwrap_or("none"),
        );

        if apply {
            if let Err(e) = reconciler
                .write_back(record, subscription.as_ref(), ObservationSource::Sweep)
                .await
            {
                failures += 1;
                tracing::error!(user_id = %record.user_id, error = %e, "Failed to apply fix");
                continue;
            }
        }
        drifted.push(drift);
    }

    println!(
        "\n{} drifted, {} failed, {} in sync",
        drifted.len(),
        failures,
        records.len().saturating_sub(drifted.len() + failures)
    );

    if failures > 0 {
        bail!("{} records could not be reconciled", failures);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn subscription(id: &str, status: &str) -> ProviderSubscription {
        ProviderSubscription {
            id: id.to_string(),
            customer_id: "cus_1".to_string(),
            status: status.to_string(),
            current_period_end: None,
            trial_end: None,
            product_id: None,
        }
    }

    #[test]
    fn test_parse_args() {
        assert!(matches!(parse_args(&[]).unwrap(), Mode::DryRun));
        assert!(matches!(parse_args(&["--apply".to_string()]).unwrap(), Mode::Apply));
        let user_id = Uuid::new_v4();
        assert!(matches!(
            parse_args(&["--history".to_string(), user_id.to_string()]).unwrap(),
            Mode::History(id) if id == user_id
        ));
        assert!(parse_args(&["--history".to_string(), "nope".to_string()]).is_err());
        assert!(parse_args(&["--force".to_string()]).is_err());
    }

    #[test]
    fn test_drift_detection() {
        let mut record =
            EntitlementRecord::new_trial(Uuid::new_v4(), "pat@example.com", OffsetDateTime::now_utc());
        record.provider_customer_id = Some("cus_1".to_string());

        assert!(drift_for(&record, None).is_none());

        let drift = drift_for(&record, Some(&subscription("sub_1", "active"))).unwrap();
        assert_eq!(drift.expected, SubscriptionStatus::Active);
        assert_eq!(drift.subscription_id.as_deref(), Some("sub_1"));

        record.status = SubscriptionStatus::Active;
        record.provider_subscription_id = Some("sub_1".to_string());
        assert!(drift_for(&record, Some(&subscription("sub_1", "active"))).is_none());
        assert_eq!(
            drift_for(&record, Some(&subscription("sub_1", "past_due"))).unwrap().expected,
            SubscriptionStatus::Inactive
        );
    }
}
