//! Server-side feature gate
//!
//! The client hides mutating actions once the trial is over, but that is a
//! convenience. Every mutating route is wrapped in [`require_feature`] so the
//! same read-only allow-list is enforced here against a fresh entitlement.

use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use jobproof_shared::{can_access_feature, Feature};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{auth::AuthUser, error::ApiError, state::AppState};

/// State for one gated route: the app plus the feature it needs
#[derive(Clone)]
pub struct FeatureGate {
    pub state: AppState,
    pub feature: Feature,
}

impl FeatureGate {
    pub fn new(state: AppState, feature: Feature) -> Self {
        Self { state, feature }
    }
}

/// Allow or deny `feature` for the caller. Read-only features never need a
/// provider round trip.
pub async fn ensure_feature(
    state: &AppState,
    user: &AuthUser,
    feature: Feature,
) -> Result<(), ApiError> {
    if feature.is_read_only() {
        return Ok(());
    }

    let snapshot = state.billing.query.get_entitlement(&user.identity()).await?;
    let full_access = snapshot.has_full_access(OffsetDateTime::now_utc());

    if can_access_feature(full_access, feature) {
        return Ok(());
    }

    tracing::info!(
        user_id = %user.user_id,
        feature = %feature,
        degraded = snapshot.degraded,
        "Feature denied without active subscription"
    );
    Err(ApiError::SubscriptionRequired)
}

/// Middleware for routes that need a paid (or trialing) entitlement.
/// Must run inside [`crate::auth::require_auth`].
pub async fn require_feature(
    State(gate): State<FeatureGate>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or(ApiError::Unauthorized)?;

    ensure_feature(&gate.state, &user, gate.feature).await?;
    Ok(next.run(request).await)
}

#[derive(Debug, Serialize)]
pub struct FeatureAccessResponse {
    pub feature: Feature,
    pub allowed: bool,
}

/// `GET /api/v1/features/:feature` for services that own mutating routes
/// outside this process
pub async fn check_feature(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(feature): Path<String>,
) -> Result<Json<FeatureAccessResponse>, ApiError> {
    let feature: Feature = feature
        .parse()
        .map_err(|_| ApiError::Validation(format!("Unknown feature: {}", feature)))?;

    ensure_feature(&state, &auth_user, feature).await?;
    Ok(Json(FeatureAccessResponse {
        feature,
        allowed: true,
    }))
}
