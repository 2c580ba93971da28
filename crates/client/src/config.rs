//! Client configuration

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API origin, e.g. `https://api.jobproof.app`
    pub base_url: String,
    /// Background refresh period while signed in
    pub refresh_interval: Duration,
    /// Per-request deadline for entitlement fetches
    pub request_timeout: Duration,
    /// A cached snapshot older than this is treated as unknown
    pub max_staleness: Duration,
    /// Extra attempts after a transient fetch failure
    pub max_retries: usize,
    /// First retry delay; doubles per attempt
    pub retry_base_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let refresh_interval = Duration::from_secs(60);
        Self {
            base_url: "http://localhost:3000".to_string(),
            refresh_interval,
            request_timeout: Duration::from_secs(10),
            max_staleness: refresh_interval * 3,
            max_retries: 2,
            retry_base_delay: Duration::from_millis(250),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
