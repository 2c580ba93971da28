//! Authentication module for JobProof

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtError, JwtManager, TokenType};
pub use middleware::{require_auth, AuthUser};
