//! Client error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Session credential rejected")]
    Unauthorized,

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Not signed in")]
    NotSignedIn,

    #[error("Dismissal storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl ClientError {
    /// Returns true if this error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Http(e) => !e.is_decode() && !e.is_builder(),
            ClientError::Status { status, .. } => *status >= 500 || *status == 429,

            ClientError::Unauthorized => false,
            ClientError::InvalidResponse(_) => false,
            ClientError::NotSignedIn => false,
            ClientError::Storage(_) => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
