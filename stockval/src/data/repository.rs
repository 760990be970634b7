//! Stock record storage abstraction.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

use super::{Segment, StockRecord};
use crate::screening::Verdict;

/// Storage failure.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt stored record: {0}")]
    Corrupt(String),
}

impl From<RepositoryError> for stockval_common::Error {
    fn from(err: RepositoryError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Filters and paging for a record listing.
#[derive(Debug, Clone)]
pub struct StockFilter {
    pub market: Option<Segment>,
    /// Substring of the symbol or name, ASCII case ignored
    pub search: Option<String>,
    pub verdict: Option<Verdict>,
    pub skip: usize,
    pub limit: usize,
}

impl Default for StockFilter {
    fn default() -> Self {
        Self {
            market: None,
            search: None,
            verdict: None,
            skip: 0,
            limit: 100,
        }
    }
}

impl StockFilter {
    pub fn matches(&self, record: &StockRecord) -> bool {
        if self.market.is_some_and(|m| record.market != m) {
            return false;
        }
        if let Some(needle) = self.search.as_deref().map(str::to_lowercase) {
            if !record.symbol.to_lowercase().contains(&needle)
                && !record.name.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        self.verdict
            .map_or(true, |verdict| Verdict::classify(record) == verdict)
    }
}

/// One page of a filtered listing.
#[derive(Debug, Clone, Default)]
pub struct StockPage {
    /// Matching records before paging
    pub total: usize,
    pub records: Vec<StockRecord>,
}

/// Persistent store of watched stock records keyed by `(symbol, market)`.
///
/// Implementations must be safe for concurrent calls from many refresh jobs.
#[async_trait]
pub trait StockRepository: Send + Sync {
    /// Symbols in a segment that take part in refreshes (`auto_update = true`).
    async fn list(&self, market: Segment) -> Result<Vec<String>, RepositoryError>;

    /// Every stored symbol in a segment, paused records included.
    async fn list_all(&self, market: Segment) -> Result<Vec<String>, RepositoryError> {
        Ok(self
            .records(Some(market))
            .await?
            .into_iter()
            .map(|r| r.symbol)
            .collect())
    }

    async fn get(
        &self,
        symbol: &str,
        market: Segment,
    ) -> Result<Option<StockRecord>, RepositoryError>;

    /// All stored records, optionally limited to one segment.
    async fn records(&self, market: Option<Segment>) -> Result<Vec<StockRecord>, RepositoryError>;

    /// Insert or replace the record with the same `(symbol, market)`.
    async fn upsert(&self, record: &StockRecord) -> Result<(), RepositoryError>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, symbol: &str, market: Segment) -> Result<bool, RepositoryError>;

    /// Matching records, most recently updated first.
    async fn page(&self, filter: &StockFilter) -> Result<StockPage, RepositoryError> {
        let mut matched: Vec<StockRecord> = self
            .records(filter.market)
            .await?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        matched.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));

        let total = matched.len();
        let records = matched
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .collect();
        Ok(StockPage { total, records })
    }
}

// ============================================================================
// In-Memory Repository
// ============================================================================

/// Ephemeral repository, used by tests and runs without a database.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    records: RwLock<BTreeMap<(Segment, String), StockRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = StockRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| ((r.market, r.symbol.clone()), r))
            .collect();
        Self {
            records: RwLock::new(map),
        }
    }
}

#[async_trait]
impl StockRepository for InMemoryRepository {
    async fn list(&self, market: Segment) -> Result<Vec<String>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.market == market && r.auto_update)
            .map(|r| r.symbol.clone())
            .collect())
    }

    async fn get(
        &self,
        symbol: &str,
        market: Segment,
    ) -> Result<Option<StockRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records.get(&(market, symbol.to_string())).cloned())
    }

    async fn records(&self, market: Option<Segment>) -> Result<Vec<StockRecord>, RepositoryError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| market.map_or(true, |m| r.market == m))
            .cloned()
            .collect())
    }

    async fn upsert(&self, record: &StockRecord) -> Result<(), RepositoryError> {
        let mut records = self.records.write().await;
        records.insert((record.market, record.symbol.clone()), record.clone());
        Ok(())
    }

    async fn delete(&self, symbol: &str, market: Segment) -> Result<bool, RepositoryError> {
        let mut records = self.records.write().await;
        Ok(records.remove(&(market, symbol.to_string())).is_some())
    }
}
