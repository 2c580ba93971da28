//! Shared application state

use std::sync::Arc;

use jobproof_billing::BillingService;
use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: PgPool,
    pub jwt: JwtManager,
    pub billing: Arc<BillingService>,
}

impl AppState {
    /// Production wiring: Stripe provider, Postgres store and ledger
    pub fn new(config: Config, pool: PgPool) -> Self {
        let billing = BillingService::new(config.stripe_config(), pool.clone(), config.engine_settings());
        Self::with_billing(config, pool, billing)
    }

    pub fn with_billing(config: Config, pool: PgPool, billing: BillingService) -> Self {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        Self {
            config: Arc::new(config),
            pool,
            jwt,
            billing: Arc::new(billing),
        }
    }
}
