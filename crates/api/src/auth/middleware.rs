//! Bearer-token authentication middleware

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::Response,
};
use jobproof_billing::VerifiedIdentity;
use jobproof_shared::normalize_email;
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

use super::jwt::JwtError;

/// Authenticated caller, inserted into request extensions by [`require_auth`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

impl AuthUser {
    pub fn identity(&self) -> VerifiedIdentity {
        VerifiedIdentity {
            user_id: self.user_id,
            email: self.email.clone(),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Reject requests without a valid access token
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;

    let claims = state.jwt.validate_access_token(token).map_err(|e| {
        match &e {
            JwtError::Expired => tracing::debug!("Rejected expired access token"),
            _ => tracing::warn!(error = %e, "Rejected access token"),
        }
        ApiError::InvalidToken
    })?;

    let email = normalize_email(&claims.email);
    if email.is_empty() {
        tracing::warn!(user_id = %claims.sub, "Access token carries no email");
        return Err(ApiError::InvalidToken);
    }

    request.extensions_mut().insert(AuthUser {
        user_id: claims.sub,
        email,
    });

    Ok(next.run(request).await)
}
