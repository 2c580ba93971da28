//! JobProof API Library
//!
//! HTTP surface of the entitlement engine: bearer authentication, the
//! entitlement query, billing webhooks and checkout, and the server-side
//! feature gate.

pub mod auth;
pub mod config;
pub mod error;
pub mod gate;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
