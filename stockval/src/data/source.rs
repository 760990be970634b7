//! Market data source abstraction.

use async_trait::async_trait;
use thiserror::Error;

use super::{Quote, Segment};

/// Errors returned by a market data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The source has no data for this symbol
    #[error("no data for {symbol}")]
    NotFound { symbol: String },

    /// Network failure, rate limiting or upstream outage
    #[error("source temporarily unavailable: {0}")]
    TransientUnavailable(String),

    /// The source refused the request or returned an unusable payload
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl FetchError {
    /// Check if the error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUnavailable(_))
    }
}

/// Trait for quote providers.
///
/// Implementations must be safe for concurrent calls from many refresh jobs.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Provider name (e.g., "xueqiu")
    fn name(&self) -> &'static str;

    /// Fetch the current quote and fundamentals for one symbol.
    async fn fetch(&self, symbol: &str, market: Segment) -> Result<Quote, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        assert!(FetchError::TransientUnavailable("503".into()).is_retryable());
        assert!(!FetchError::NotFound { symbol: "X".into() }.is_retryable());
        assert!(!FetchError::Rejected("bad token".into()).is_retryable());
    }
}
