use crate::dispatch::StatusCode;
use crate::rate_limit::StoreError;
use thiserror::Error;

/// Result type for dispatcher operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Request-level dispatcher errors.
///
/// Per-recipient quota failures are not represented here, they travel as
/// [`crate::rate_limit::QuotaError`] and end up in the response fail list.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    InvalidParam(String),

    #[error("no sender under {0}")]
    NoSenderRegistered(String),

    #[error("Quota store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Get the response status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::InvalidParam(_) => StatusCode::InvalidParam,
            DispatchError::NoSenderRegistered(_) => StatusCode::NoSender,
            DispatchError::Config(_) | DispatchError::Store(_) => StatusCode::NotSent,
        }
    }
}
