//! JobProof Shared Types and Utilities
//!
//! Entitlement domain types shared by the server (billing, api) and the
//! client session engine, plus database pool helpers behind the `db` feature.

#[cfg(feature = "db")]
pub mod db;
pub mod error;
pub mod gating;
pub mod types;

#[cfg(feature = "db")]
pub use db::*;
pub use error::*;
pub use gating::{can_access_feature, Feature, READ_ONLY_FEATURES};
pub use types::*;
