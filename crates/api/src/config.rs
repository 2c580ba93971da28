//! Application configuration

use std::env;
use std::time::Duration;

use jobproof_billing::{EngineSettings, StripeConfig};

/// Application configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub app_base_url: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Stripe
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    pub stripe_price_id: String,

    // Entitlement engine
    pub trial_days: i64,
    pub provider_timeout_secs: u64,
    pub webhook_tolerance_secs: i64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("app_base_url", &self.app_base_url)
            .field("database_max_connections", &self.database_max_connections)
            .field("jwt_expiry_hours", &self.jwt_expiry_hours)
            .field("stripe_price_id", &self.stripe_price_id)
            .field("trial_days", &self.trial_days)
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish_non_exhaustive()
    }
}

fn parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: required("DATABASE_URL")?,
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS", 20),

            // Authentication
            jwt_secret: {
                let secret = required("JWT_SECRET")?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: parsed("JWT_EXPIRY_HOURS", 24),

            // Stripe
            stripe_secret_key: required("STRIPE_SECRET_KEY")?,
            stripe_webhook_secret: required("STRIPE_WEBHOOK_SECRET")?,
            stripe_price_id: required("STRIPE_PRICE_ID")?,

            // Entitlement engine
            trial_days: {
                let days = parsed("TRIAL_DAYS", 7);
                if days < 0 {
                    return Err(ConfigError::Invalid("TRIAL_DAYS must not be negative"));
                }
                days
            },
            provider_timeout_secs: {
                let secs = parsed("PROVIDER_TIMEOUT_SECS", 10);
                if secs == 0 {
                    return Err(ConfigError::Invalid("PROVIDER_TIMEOUT_SECS must be positive"));
                }
                secs
            },
            webhook_tolerance_secs: parsed("WEBHOOK_TOLERANCE_SECS", 300),
        })
    }

    pub fn stripe_config(&self) -> StripeConfig {
        StripeConfig {
            secret_key: self.stripe_secret_key.clone(),
            webhook_secret: self.stripe_webhook_secret.clone(),
            price_id: self.stripe_price_id.clone(),
            app_base_url: self.app_base_url.clone(),
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
            trial_length: time::Duration::days(self.trial_days),
            webhook_tolerance_secs: self.webhook_tolerance_secs,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Config tests mutate shared env vars
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    const KEYS: &[&str] = &[
        "DATABASE_URL",
        "JWT_SECRET",
        "STRIPE_SECRET_KEY",
        "STRIPE_WEBHOOK_SECRET",
        "STRIPE_PRICE_ID",
        "TRIAL_DAYS",
        "PROVIDER_TIMEOUT_SECS",
        "WEBHOOK_TOLERANCE_SECS",
    ];

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
        env::set_var("STRIPE_SECRET_KEY", "sk_test_123");
        env::set_var("STRIPE_WEBHOOK_SECRET", "whsec_test_123");
        env::set_var("STRIPE_PRICE_ID", "price_monthly");
    }

    fn cleanup_config() {
        for key in KEYS {
            env::remove_var(key);
        }
    }

    #[test]
    fn test_defaults_and_validation() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();

        // === Defaults ===
        cleanup_config();
        setup_minimal_config();
        let config = Config::from_env().unwrap();
        assert_eq!(config.trial_days, 7);
        assert_eq!(config.provider_timeout_secs, 10);
        assert_eq!(config.webhook_tolerance_secs, 300);
        assert_eq!(
            config.engine_settings().provider_timeout,
            Duration::from_secs(10)
        );

        // === Overrides ===
        env::set_var("TRIAL_DAYS", "14");
        env::set_var("PROVIDER_TIMEOUT_SECS", "3");
        let config = Config::from_env().unwrap();
        assert_eq!(config.engine_settings().trial_length, time::Duration::days(14));
        assert_eq!(config.provider_timeout_secs, 3);

        // === Zero timeout rejected ===
        env::set_var("PROVIDER_TIMEOUT_SECS", "0");
        assert!(matches!(Config::from_env(), Err(ConfigError::Invalid(_))));
        env::remove_var("PROVIDER_TIMEOUT_SECS");

        // === Weak JWT secret rejected ===
        env::set_var("JWT_SECRET", "short");
        assert!(matches!(Config::from_env(), Err(ConfigError::WeakSecret(_))));

        // === Missing Stripe key ===
        setup_minimal_config();
        env::remove_var("STRIPE_WEBHOOK_SECRET");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("STRIPE_WEBHOOK_SECRET"))
        ));

        cleanup_config();
    }

    #[test]
    fn test_debug_hides_secrets() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();
        cleanup_config();
        setup_minimal_config();

        let rendered = format!("{:?}", Config::from_env().unwrap());
        assert!(!rendered.contains("sk_test_123"));
        assert!(!rendered.contains("test-jwt-secret"));

        cleanup_config();
    }
}
