//! Account bootstrap, called by the client right after sign-in

use axum::{extract::State, Extension, Json};
use jobproof_shared::SubscriptionStatus;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub user_id: Uuid,
    pub email: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    pub status: SubscriptionStatus,
}

/// `POST /api/v1/account/bootstrap`: create the entitlement record (and
/// start the trial clock) on first sign-in. Idempotent.
pub async fn bootstrap(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<AccountResponse>, ApiError> {
    let record = state.billing.query.bootstrap(&auth_user.identity()).await?;

    Ok(Json(AccountResponse {
        user_id: record.user_id,
        email: record.email,
        trial_ends_at: record.trial_ends_at,
        status: record.status,
    }))
}
