//! Error types for the request throttler.

use thiserror::Error;

use crate::guard::Rejection;

/// Main error type for throttler operations.
#[derive(Error, Debug)]
pub enum ThrottlerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The visitor store could not be reached or refused the operation
    #[error("Store error: {0}")]
    Store(String),

    /// The visitor store did not answer within its deadline
    #[error("Store timed out after {0} ms")]
    StoreTimeout(u64),

    /// A stored visitor record could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The client exhausted its attempts for the current window
    #[error("{}", .0.message)]
    RequestLimited(Rejection),

    /// I/O errors, e.g. an unreadable configuration file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for throttler operations.
pub type Result<T> = std::result::Result<T, ThrottlerError>;
