//! Entitlement query endpoint

use axum::{extract::State, Extension, Json};
use jobproof_shared::EntitlementSnapshot;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// `GET|POST /api/v1/entitlement`
///
/// Always answers with a snapshot unless the local record cannot be read or
/// created. Provider outages show up as `degraded: true` with no access.
pub async fn get_entitlement(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> Result<Json<EntitlementSnapshot>, ApiError> {
    let snapshot = state
        .billing
        .query
        .get_entitlement(&auth_user.identity())
        .await?;

    tracing::debug!(
        user_id = %auth_user.user_id,
        subscribed = snapshot.subscribed,
        in_trial = snapshot.in_trial,
        degraded = snapshot.degraded,
        "Entitlement computed"
    );

    Ok(Json(snapshot))
}
