//! Once-per-day trial warning de-duplication
//!
//! The marker is the calendar date a warning was last dismissed on. It is
//! keyed on the date only, so once any warning is dismissed no further
//! warning shows until the next day, even if the level escalates.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use time::{Date, OffsetDateTime, UtcOffset};
use tokio::sync::RwLock;

use crate::error::ClientResult;

/// Per-device storage for the single "last dismissed" value
#[async_trait]
pub trait WarningDismissalStore: Send + Sync {
    async fn load(&self) -> ClientResult<Option<String>>;
    async fn save(&self, value: &str) -> ClientResult<()>;
}

#[derive(Default)]
pub struct InMemoryDismissalStore {
    value: RwLock<Option<String>>,
}

impl InMemoryDismissalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WarningDismissalStore for InMemoryDismissalStore {
    async fn load(&self) -> ClientResult<Option<String>> {
        Ok(self.value.read().await.clone())
    }

    async fn save(&self, value: &str) -> ClientResult<()> {
        *self.value.write().await = Some(value.to_string());
        Ok(())
    }
}

/// Stores the marker in a small text file
pub struct FileDismissalStore {
    path: PathBuf,
}

impl FileDismissalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WarningDismissalStore for FileDismissalStore {
    async fn load(&self) -> ClientResult<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let value = contents.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, value: &str) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, value).await?;
        Ok(())
    }
}

/// Answers "was a warning already shown today?" in the device's calendar
#[derive(Clone)]
pub struct WarningDeduplicator {
    store: Arc<dyn WarningDismissalStore>,
    offset: UtcOffset,
}

impl WarningDeduplicator {
    /// Calendar days in UTC
    pub fn new(store: Arc<dyn WarningDismissalStore>) -> Self {
        Self::with_offset(store, UtcOffset::UTC)
    }

    /// Calendar days in the given local offset
    pub fn with_offset(store: Arc<dyn WarningDismissalStore>, offset: UtcOffset) -> Self {
        Self { store, offset }
    }

    fn day(&self, now: OffsetDateTime) -> Date {
        now.to_offset(self.offset).date()
    }

    /// Unreadable storage counts as "not shown": a repeated warning is
    /// preferable to a missed one.
    pub async fn has_shown_today(&self, now: OffsetDateTime) -> bool {
        match self.store.load().await {
            Ok(Some(marker)) => marker == self.day(now).to_string(),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read warning dismissal marker");
                false
            }
        }
    }

    pub async fn mark_shown(&self, now: OffsetDateTime) -> ClientResult<()> {
        self.store.save(&self.day(now).to_string()).await
    }
}
