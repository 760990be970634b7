//! Error types shared by the stockval crates.

use thiserror::Error;

/// Unified error type surfaced at the service boundary.
#[derive(Error, Debug)]
pub enum Error {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request conflicts with work already in progress
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Upstream market data provider error
    #[error("External service error: {0}")]
    External(String),

    /// Persistent storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation exceeded its time budget
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::Conflict(_) => 409,
            Self::External(_) => 502,
            Self::Timeout(_) => 504,
            Self::Storage(_) | Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for API error bodies.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Conflict(_) => "ALREADY_RUNNING",
            Self::External(_) => "UPSTREAM_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
