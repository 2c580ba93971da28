//! JobProof Client Entitlement Engine
//!
//! Session-side half of entitlement sync:
//! - Snapshot cache that drops out-of-order and stale-session completions
//! - Refresh on sign-in, on a fixed interval and on gated navigation
//! - Trial state machine and feature gating
//! - Once-per-day warning de-duplication

pub mod cache;
pub mod config;
pub mod dismissal;
pub mod error;
pub mod fetcher;
pub mod session;
pub mod trial;

pub use cache::{EntitlementCache, RefreshTicket};
pub use config::ClientConfig;
pub use dismissal::{
    FileDismissalStore, InMemoryDismissalStore, WarningDeduplicator, WarningDismissalStore,
};
pub use error::{ClientError, ClientResult};
pub use fetcher::{EntitlementFetcher, HttpEntitlementFetcher};
pub use session::EntitlementSession;
pub use trial::{can_access_feature, TrialState, WarningLevel};
