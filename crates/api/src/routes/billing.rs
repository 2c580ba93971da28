//! Billing routes: provider webhook, checkout and explicit refresh

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use jobproof_billing::{
    snapshot_for, CheckoutResponse, ObservationSource, ReconcileOutcome, WebhookOutcome,
};
use jobproof_shared::EntitlementSnapshot;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// Provider webhook.
///
/// 200 once the event is applied, skipped or already handled; 400 for a bad
/// signature or payload (no redelivery); 5xx asks the provider to redeliver.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    let outcome = state.billing.handle_webhook(&body, signature).await?;

    let result = match &outcome {
        WebhookOutcome::Duplicate => "duplicate".to_string(),
        WebhookOutcome::Ignored => "ignored".to_string(),
        WebhookOutcome::Reconciled(ReconcileOutcome::Applied { .. }) => "applied".to_string(),
        WebhookOutcome::Reconciled(ReconcileOutcome::Skipped(reason)) => {
            format!("skipped:{}", reason)
        }
    };

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "received": true, "result": result })),
    ))
}

/// `POST /api/v1/billing/checkout`
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let record = state.billing.query.bootstrap(&auth_user.identity()).await?;
    let response = state.billing.checkout.start_checkout(&record).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct CompleteCheckoutRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct CompleteCheckoutResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub entitlement: EntitlementSnapshot,
}

/// `POST /api/v1/billing/checkout/complete`
///
/// Client-side completion signal. The session is re-read from the provider,
/// so the body only names it.
pub async fn complete_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<CompleteCheckoutRequest>,
) -> Result<Json<CompleteCheckoutResponse>, ApiError> {
    let session_id = request.session_id.trim();
    if session_id.is_empty() {
        return Err(ApiError::Validation("session_id is required".to_string()));
    }

    let identity = auth_user.identity();
    state.billing.query.bootstrap(&identity).await?;

    let outcome = state
        .billing
        .checkout
        .complete_checkout(&identity, session_id)
        .await?;

    let entitlement = state.billing.query.get_entitlement(&identity).await?;

    let (applied, skip_reason) = match outcome {
        ReconcileOutcome::Applied { .. } => (true, None),
        ReconcileOutcome::Skipped(reason) => (false, Some(reason.to_string())),
    };

    Ok(Json(CompleteCheckoutResponse {
        applied,
        skip_reason,
        entitlement,
    }))
}

/// `POST /api/v1/billing/refresh`
///
/// Re-reads the provider for the caller and overwrites the stored record.
/// Unlike the entitlement query, provider trouble is reported as 503 so the
/// client keeps the snapshot it already has.
pub async fn refresh(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<EntitlementSnapshot>, ApiError> {
    state.billing.query.bootstrap(&auth_user.identity()).await?;

    let refreshed = state
        .billing
        .reconciler
        .refresh_user(auth_user.user_id, ObservationSource::Refresh)
        .await?;

    let now = OffsetDateTime::now_utc();
    let snapshot = match refreshed.record.provider_customer_id.clone() {
        Some(customer_id) => snapshot_for(
            &refreshed.record,
            customer_id,
            refreshed.subscription.as_ref(),
            now,
        ),
        None => EntitlementSnapshot::from_local_trial(refreshed.record.trial_ends_at, None, now),
    };

    Ok(Json(snapshot))
}
