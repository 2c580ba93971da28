//! Entitlement snapshot fetching

use async_trait::async_trait;
use jobproof_shared::EntitlementSnapshot;
use reqwest::{Client, StatusCode};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

const ENTITLEMENT_PATH: &str = "/api/v1/entitlement";

/// Source of fresh snapshots for the cache
#[async_trait]
pub trait EntitlementFetcher: Send + Sync {
    async fn fetch(&self, access_token: &str) -> ClientResult<EntitlementSnapshot>;
}

/// Fetches from the JobProof API over HTTP
#[derive(Clone)]
pub struct HttpEntitlementFetcher {
    client: Client,
    config: ClientConfig,
}

impl HttpEntitlementFetcher {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(2)
            .build()?;
        Ok(Self { client, config })
    }

    async fn fetch_once(&self, access_token: &str) -> ClientResult<EntitlementSnapshot> {
        let response = self
            .client
            .get(self.config.endpoint(ENTITLEMENT_PATH))
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown"))
                .to_string();
            return Err(ClientError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl EntitlementFetcher for HttpEntitlementFetcher {
    /// Retries transient failures with exponential backoff; credential and
    /// decoding errors are returned immediately.
    async fn fetch(&self, access_token: &str) -> ClientResult<EntitlementSnapshot> {
        let base_millis = u64::try_from(self.config.retry_base_delay.as_millis()).unwrap_or(u64::MAX);
        let retry_strategy = ExponentialBackoff::from_millis(base_millis.max(1))
            .factor(2)
            .max_delay(self.config.request_timeout)
            .take(self.config.max_retries)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.fetch_once(access_token).await;
            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "Transient entitlement fetch error - will retry");
                    Err(result)
                }
                Err(_) => Ok(result),
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }
}
