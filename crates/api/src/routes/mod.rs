//! API routes

pub mod account;
pub mod billing;
pub mod entitlement;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{auth::require_auth, gate, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public API routes (no auth required) - under /api/v1
    let public_api_routes = Router::new()
        // Stripe webhook (public, uses signature verification)
        .route("/billing/webhook", post(billing::webhook));

    // Protected API routes (auth required) - under /api/v1
    let protected_api_routes = Router::new()
        .route(
            "/entitlement",
            get(entitlement::get_entitlement).post(entitlement::get_entitlement),
        )
        .route("/account/bootstrap", post(account::bootstrap))
        .route("/billing/checkout", post(billing::create_checkout))
        .route("/billing/checkout/complete", post(billing::complete_checkout))
        .route("/billing/refresh", post(billing::refresh))
        .route("/features/:feature", get(gate::check_feature))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::IntoResponse,
    };
    use jobproof_billing::testing::{
        signature_header, FakeBillingProvider, InMemoryEntitlementStore, InMemoryWebhookLedger,
    };
    use jobproof_billing::{BillingService, EntitlementStore};
    use jobproof_shared::{EntitlementRecord, Feature};
    use sqlx::postgres::PgPoolOptions;
    use time::{Duration, OffsetDateTime};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::config::Config;
    use crate::gate::{require_feature, FeatureGate};

    const JWT_SECRET: &str = "router-test-secret-at-least-32-characters";
    const WEBHOOK_SECRET: &str = "whsec_router_tests";

    struct Harness {
        state: AppState,
        app: Router,
        provider: Arc<FakeBillingProvider>,
        store: Arc<InMemoryEntitlementStore>,
    }

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".to_string(),
            app_base_url: "https://app.example.test".to_string(),
            database_url: "postgres://localhost/jobproof_test".to_string(),
            database_max_connections: 1,
            jwt_secret: JWT_SECRET.to_string(),
            jwt_expiry_hours: 1,
            stripe_secret_key: "sk_test_router".to_string(),
            stripe_webhook_secret: WEBHOOK_SECRET.to_string(),
            stripe_price_id: "price_monthly".to_string(),
            trial_days: 7,
            provider_timeout_secs: 10,
            webhook_tolerance_secs: 300,
        }
    }

    fn harness() -> Harness {
        let config = test_config();
        let provider = Arc::new(FakeBillingProvider::new());
        let store = Arc::new(InMemoryEntitlementStore::new());
        let ledger = Arc::new(InMemoryWebhookLedger::new());
        let billing = BillingService::from_parts(
            provider.clone(),
            store.clone(),
            ledger,
            &config.stripe_config(),
            config.engine_settings(),
        );
        // Never connected: these tests do not touch the database
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        let state = AppState::with_billing(config, pool, billing);
        Harness {
            app: create_router(state.clone()),
            state,
            provider,
            store,
        }
    }

    fn token(h: &Harness, user_id: Uuid, email: &str) -> String {
        h.state.jwt.generate_access_token(user_id, email).unwrap()
    }

    fn authed(method: Method, uri: &str, token: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token));
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn webhook_request(event_id: &str, event_type: &str, object: serde_json::Value) -> Request<Body> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let payload = serde_json::json!({
            "id": event_id,
            "type": event_type,
            "created": now,
            "data": { "object": object },
        })
        .to_string();
        Request::builder()
            .method(Method::POST)
            .uri("/api/v1/billing/webhook")
            .header("stripe-signature", signature_header(WEBHOOK_SECRET, now, &payload))
            .body(Body::from(payload))
            .unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_liveness() {
        let h = harness();
        let request = Request::builder().uri("/health/live").body(Body::empty()).unwrap();
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_entitlement_requires_bearer_token() {
        let h = harness();
        let request = Request::builder()
            .uri("/api/v1/entitlement")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let (status, body) = send(
            &h.app,
            authed(Method::GET, "/api/v1/entitlement", "not-a-jwt", None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_new_user_gets_local_trial() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let token = token(&h, user_id, "pat@example.com");

        let (status, body) = send(&h.app, authed(Method::POST, "/api/v1/entitlement", &token, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscribed"], false);
        assert_eq!(body["in_trial"], true);
        assert!(body["trial_end"].is_string());
        assert_eq!(body["degraded"], false);
        assert!(h.store.get(user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_provider_outage_degrades_instead_of_failing() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let token = token(&h, user_id, "pat@example.com");
        h.provider.set_unavailable(true);

        let (status, body) = send(&h.app, authed(Method::GET, "/api/v1/entitlement", &token, None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscribed"], false);
        assert_eq!(body["in_trial"], false);
        assert_eq!(body["degraded"], true);
    }

    #[tokio::test]
    async fn test_webhook_status_codes() {
        let h = harness();

        // Missing signature
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/billing/webhook")
            .body(Body::from("{}"))
            .unwrap();
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Forged signature
        let mut request = webhook_request(
            "evt_forged",
            "customer.subscription.updated",
            serde_json::json!({ "id": "sub_1", "customer": "cus_1", "status": "active" }),
        );
        request.headers_mut().insert(
            "stripe-signature",
            "t=1,v1=deadbeef".parse().unwrap(),
        );
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Unknown customer: acknowledged, nothing to retry
        h.provider.add_customer("cus_1", "nobody@example.com").await;
        let (status, body) = send(
            &h.app,
            webhook_request(
                "evt_unmatched",
                "customer.subscription.updated",
                serde_json::json!({ "id": "sub_1", "customer": "cus_1", "status": "active" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "skipped:no_matching_user");
    }

    #[tokio::test]
    async fn test_webhook_store_failure_asks_for_redelivery() {
        let h = harness();
        let user_id = Uuid::new_v4();
        h.store
            .ensure_record(user_id, "pat@example.com", OffsetDateTime::now_utc())
            .await
            .unwrap();
        h.provider.add_customer("cus_1", "pat@example.com").await;
        h.store.set_fail_writes(true);

        let request = webhook_request(
            "evt_store_down",
            "customer.subscription.created",
            serde_json::json!({ "id": "sub_1", "customer": "cus_1", "status": "active" }),
        );
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        h.store.set_fail_writes(false);
        h.provider.set_unavailable(true);
        let request = webhook_request(
            "evt_provider_down",
            "customer.subscription.created",
            serde_json::json!({ "id": "sub_1", "customer": "cus_1", "status": "active" }),
        );
        let (status, _) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_checkout_to_subscribed_end_to_end() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let token = token(&h, user_id, "pat@example.com");

        let (status, body) = send(&h.app, authed(Method::POST, "/api/v1/account/bootstrap", &token, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "inactive");

        let (status, body) = send(&h.app, authed(Method::POST, "/api/v1/billing/checkout", &token, None)).await;
        assert_eq!(status, StatusCode::OK);
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let customer_id = h
            .store
            .get(user_id)
            .await
            .unwrap()
            .unwrap()
            .provider_customer_id
            .unwrap();
        let period_end = OffsetDateTime::now_utc() + Duration::days(30);
        h.provider
            .complete_session(&session_id, "sub_e2e", Some(period_end))
            .await
            .unwrap();

        let (status, _) = send(
            &h.app,
            webhook_request(
                "evt_checkout",
                "checkout.session.completed",
                serde_json::json!({
                    "id": session_id,
                    "mode": "subscription",
                    "customer": customer_id,
                    "subscription": "sub_e2e",
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&h.app, authed(Method::GET, "/api/v1/entitlement", &token, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscribed"], true);
        assert_eq!(body["product_id"], "prod_jobproof");
        assert_eq!(body["customer_id"], customer_id.as_str());

        // The client-side completion call for the same session is harmless
        let (status, body) = send(
            &h.app,
            authed(
                Method::POST,
                "/api/v1/billing/checkout/complete",
                &token,
                Some(serde_json::json!({ "session_id": session_id })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applied"], true);
        assert_eq!(body["entitlement"]["subscribed"], true);
    }

    #[tokio::test]
    async fn test_refresh_reports_provider_outage() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let token = token(&h, user_id, "pat@example.com");
        h.provider.add_customer("cus_1", "pat@example.com").await;
        h.provider
            .set_subscription("sub_1", "cus_1", "trialing", None, Some(OffsetDateTime::now_utc() + Duration::days(3)))
            .await;

        let (status, body) = send(&h.app, authed(Method::POST, "/api/v1/billing/refresh", &token, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["subscribed"], true);
        assert_eq!(body["in_trial"], true);

        h.provider.set_unavailable(true);
        let (status, _) = send(&h.app, authed(Method::POST, "/api/v1/billing/refresh", &token, None)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_expired_trial_keeps_read_only_features() {
        let h = harness();
        let user_id = Uuid::new_v4();
        let token = token(&h, user_id, "pat@example.com");
        h.store
            .insert(EntitlementRecord::new_trial(
                user_id,
                "pat@example.com",
                OffsetDateTime::now_utc() - Duration::hours(1),
            ))
            .await;

        let (status, body) = send(&h.app, authed(Method::GET, "/api/v1/features/create_job", &token, None)).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["error"]["code"], "SUBSCRIPTION_REQUIRED");

        let (status, body) = send(&h.app, authed(Method::GET, "/api/v1/features/view_jobs", &token, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["allowed"], true);

        let (status, _) = send(&h.app, authed(Method::GET, "/api/v1/features/teleport", &token, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_require_feature_guards_mutating_route() {
        let h = harness();
        let gated = Router::new()
            .route("/jobs", post(|| async { StatusCode::CREATED.into_response() }))
            .route_layer(middleware::from_fn_with_state(
                FeatureGate::new(h.state.clone(), Feature::CreateJob),
                require_feature,
            ))
            .layer(middleware::from_fn_with_state(h.state.clone(), require_auth));

        let trialing = Uuid::new_v4();
        let (status, _) = send(
            &gated,
            authed(Method::POST, "/jobs", &token(&h, trialing, "new@example.com"), None),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let lapsed = Uuid::new_v4();
        h.store
            .insert(EntitlementRecord::new_trial(
                lapsed,
                "lapsed@example.com",
                OffsetDateTime::now_utc() - Duration::days(1),
            ))
            .await;
        let (status, _) = send(
            &gated,
            authed(Method::POST, "/jobs", &token(&h, lapsed, "lapsed@example.com"), None),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    }
}
