//! Session-scoped entitlement snapshot cache
//!
//! Refreshes are not serialized. Each one takes a ticket carrying a
//! request sequence number and the session generation; a completion is kept
//! only if no later-started refresh has completed first and the session has
//! not been cleared since the ticket was issued.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use jobproof_shared::EntitlementSnapshot;
use tokio::time::Instant;

use crate::error::ClientResult;
use crate::fetcher::EntitlementFetcher;

/// Issued when a refresh starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    pub seq: u64,
    generation: u64,
}

#[derive(Debug, Clone)]
struct CachedSnapshot {
    snapshot: EntitlementSnapshot,
    seq: u64,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    generation: u64,
    next_seq: u64,
    entry: Option<CachedSnapshot>,
}

#[derive(Debug)]
pub struct EntitlementCache {
    state: Mutex<CacheState>,
    max_staleness: Duration,
}

impl EntitlementCache {
    pub fn new(max_staleness: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_staleness,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Nothing panics while holding the lock, but never propagate poison
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn begin(&self) -> RefreshTicket {
        let mut state = self.lock();
        state.next_seq += 1;
        RefreshTicket {
            seq: state.next_seq,
            generation: state.generation,
        }
    }

    /// Store a finished fetch. Returns false when the result was discarded
    /// as out of order or from an ended session.
    pub fn complete(&self, ticket: RefreshTicket, snapshot: EntitlementSnapshot) -> bool {
        let mut state = self.lock();

        if ticket.generation != state.generation {
            tracing::debug!(seq = ticket.seq, "Dropping entitlement from an ended session");
            return false;
        }
        if state.entry.as_ref().is_some_and(|e| e.seq > ticket.seq) {
            tracing::debug!(seq = ticket.seq, "Dropping out-of-order entitlement response");
            return false;
        }

        state.entry = Some(CachedSnapshot {
            snapshot,
            seq: ticket.seq,
            fetched_at: Instant::now(),
        });
        true
    }

    /// Fetch and store, honoring ticket ordering.
    ///
    /// Returns the snapshot now in the cache, which is not necessarily the
    /// one this call fetched.
    pub async fn refresh(
        &self,
        fetcher: &dyn EntitlementFetcher,
        access_token: &str,
    ) -> ClientResult<Option<EntitlementSnapshot>> {
        let ticket = self.begin();
        let snapshot = fetcher.fetch(access_token).await?;
        self.complete(ticket, snapshot);
        Ok(self.current())
    }

    /// Last stored snapshot, unless it is older than the staleness bound
    pub fn current(&self) -> Option<EntitlementSnapshot> {
        let state = self.lock();
        state
            .entry
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() <= self.max_staleness)
            .map(|e| e.snapshot.clone())
    }

    /// Drop the snapshot and invalidate every in-flight refresh
    pub fn clear(&self) {
        let mut state = self.lock();
        state.generation += 1;
        state.entry = None;
    }
}
