//! Signed-in entitlement session
//!
//! Owns the snapshot cache for one user and keeps it fresh: once at sign-in,
//! on a fixed interval, and whenever the user navigates to a gated screen.
//! Signing out stops the interval task and invalidates any refresh still
//! in flight.

use std::sync::{Arc, Mutex, MutexGuard};

use jobproof_shared::{EntitlementSnapshot, Feature};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::cache::EntitlementCache;
use crate::config::ClientConfig;
use crate::dismissal::WarningDeduplicator;
use crate::error::{ClientError, ClientResult};
use crate::fetcher::EntitlementFetcher;
use crate::trial::{can_access_feature, TrialState};

struct ActiveSession {
    access_token: String,
    refresh_task: JoinHandle<()>,
}

pub struct EntitlementSession {
    fetcher: Arc<dyn EntitlementFetcher>,
    cache: Arc<EntitlementCache>,
    dedup: WarningDeduplicator,
    config: ClientConfig,
    active: Mutex<Option<ActiveSession>>,
}

impl EntitlementSession {
    pub fn new(
        config: ClientConfig,
        fetcher: Arc<dyn EntitlementFetcher>,
        dedup: WarningDeduplicator,
    ) -> Self {
        Self {
            fetcher,
            cache: Arc::new(EntitlementCache::new(config.max_staleness)),
            dedup,
            config,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveSession>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a session and fetch the first snapshot.
    ///
    /// The session stays signed in even if the first fetch fails; the
    /// interval task keeps trying.
    pub async fn sign_in(
        &self,
        access_token: impl Into<String>,
    ) -> ClientResult<Option<EntitlementSnapshot>> {
        let access_token = access_token.into();

        self.end_session();

        let refresh_task = tokio::spawn(periodic_refresh(
            self.fetcher.clone(),
            self.cache.clone(),
            access_token.clone(),
            self.config.refresh_interval,
        ));
        *self.active() = Some(ActiveSession {
            access_token: access_token.clone(),
            refresh_task,
        });

        tracing::debug!("Entitlement session started");
        self.cache.refresh(self.fetcher.as_ref(), &access_token).await
    }

    /// Refresh before showing a gated screen
    pub async fn on_gated_navigation(&self) -> ClientResult<Option<EntitlementSnapshot>> {
        let access_token = self
            .active()
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(ClientError::NotSignedIn)?;

        self.cache.refresh(self.fetcher.as_ref(), &access_token).await
    }

    pub fn sign_out(&self) {
        self.end_session();
        tracing::debug!("Entitlement session ended");
    }

    fn end_session(&self) {
        if let Some(previous) = self.active().take() {
            previous.refresh_task.abort();
        }
        self.cache.clear();
    }

    pub fn is_signed_in(&self) -> bool {
        self.active().is_some()
    }

    /// Current snapshot, or `None` when unknown or stale
    pub fn snapshot(&self) -> Option<EntitlementSnapshot> {
        self.cache.current()
    }

    pub async fn trial_state(&self, now: OffsetDateTime) -> Option<TrialState> {
        let snapshot = self.cache.current()?;
        let has_shown_today = self.dedup.has_shown_today(now).await;
        Some(TrialState::derive(&snapshot, now, has_shown_today))
    }

    /// With no usable snapshot only read-only features are allowed
    pub fn can_access(&self, feature: Feature, now: OffsetDateTime) -> bool {
        match self.cache.current() {
            Some(snapshot) => can_access_feature(&snapshot, now, feature),
            None => feature.is_read_only(),
        }
    }

    /// Record that the user dismissed today's trial warning
    pub async fn acknowledge_warning(&self, now: OffsetDateTime) -> ClientResult<()> {
        self.dedup.mark_shown(now).await
    }
}

impl Drop for EntitlementSession {
    fn drop(&mut self) {
        if let Some(active) = self.active().take() {
            active.refresh_task.abort();
        }
    }
}

async fn periodic_refresh(
    fetcher: Arc<dyn EntitlementFetcher>,
    cache: Arc<EntitlementCache>,
    access_token: String,
    period: std::time::Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match cache.refresh(fetcher.as_ref(), &access_token).await {
            Ok(_) => tracing::trace!("Periodic entitlement refresh complete"),
            Err(ClientError::Unauthorized) => {
                tracing::warn!("Session credential rejected - stopping periodic entitlement refresh");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Periodic entitlement refresh failed, keeping last snapshot");
            }
        }
    }
}
