//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use stockval::data::{
    FetchError, InMemoryRepository, MarketDataSource, Quote, RepositoryError, Segment,
    StockRecord, StockRepository,
};
use stockval::orchestrator::{MarketUpdateOrchestrator, StatusStore};
use stockval::refresh::{RefreshJob, RetryPolicy};
use stockval::valuation::ValuationEngine;

// ============================================================================
// Fake Source
// ============================================================================

/// How the fake source answers for one symbol.
#[derive(Debug, Clone)]
pub enum Answer {
    Quote(Quote),
    NotFound,
    Transient,
    Rejected,
}

/// Source answering from a fixed table, with an optional per-call delay.
pub struct FakeSource {
    answers: HashMap<String, Answer>,
    delay: Duration,
    calls: AtomicU32,
}

impl FakeSource {
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with(mut self, symbol: &str, answer: Answer) -> Self {
        self.answers.insert(symbol.to_string(), answer);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MarketDataSource for FakeSource {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch(&self, symbol: &str, _market: Segment) -> Result<Quote, FetchError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.answers.get(symbol) {
            Some(Answer::Quote(quote)) => Ok(quote.clone()),
            Some(Answer::Transient) => Err(FetchError::TransientUnavailable("503".into())),
            Some(Answer::Rejected) => Err(FetchError::Rejected("bad token".into())),
            Some(Answer::NotFound) | None => Err(FetchError::NotFound {
                symbol: symbol.to_string(),
            }),
        }
    }
}

/// A quote that values cleanly.
pub fn quote(symbol: &str, price: f64) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        name: Some(format!("{} Corp", symbol)),
        price: Some(price),
        pe: Some(12.0),
        eps: Some(33.275),
        book_value_per_share: Some(133.1),
        roe: Some(0.25),
        ..Default::default()
    }
}

// ============================================================================
// Repositories
// ============================================================================

/// Repository whose `list` fails for the given segments.
pub struct ListFailingRepository {
    inner: InMemoryRepository,
    failing: HashSet<Segment>,
}

impl ListFailingRepository {
    pub fn new(inner: InMemoryRepository, failing: &[Segment]) -> Self {
        Self {
            inner,
            failing: failing.iter().copied().collect(),
        }
    }
}

#[async_trait]
impl StockRepository for ListFailingRepository {
    async fn list(&self, market: Segment) -> Result<Vec<String>, RepositoryError> {
        if self.failing.contains(&market) {
            return Err(RepositoryError::Backend("database is locked".into()));
        }
        self.inner.list(market).await
    }

    async fn list_all(&self, market: Segment) -> Result<Vec<String>, RepositoryError> {
        if self.failing.contains(&market) {
            return Err(RepositoryError::Backend("database is locked".into()));
        }
        self.inner.list_all(market).await
    }

    async fn get(
        &self,
        symbol: &str,
        market: Segment,
    ) -> Result<Option<StockRecord>, RepositoryError> {
        self.inner.get(symbol, market).await
    }

    async fn records(&self, market: Option<Segment>) -> Result<Vec<StockRecord>, RepositoryError> {
        self.inner.records(market).await
    }

    async fn upsert(&self, record: &StockRecord) -> Result<(), RepositoryError> {
        self.inner.upsert(record).await
    }

    async fn delete(&self, symbol: &str, market: Segment) -> Result<bool, RepositoryError> {
        self.inner.delete(symbol, market).await
    }
}

/// Watched records for `symbols` in `market`.
pub fn records(market: Segment, symbols: &[&str]) -> Vec<StockRecord> {
    symbols
        .iter()
        .map(|s| StockRecord::new(*s, market))
        .collect()
}

// ============================================================================
// Wiring
// ============================================================================

pub fn fast_job(source: Arc<dyn MarketDataSource>, repo: Arc<dyn StockRepository>) -> RefreshJob {
    RefreshJob::new(source, repo, ValuationEngine::default())
        .with_retry(RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        })
        .with_timeout(Duration::from_secs(5))
}

pub fn orchestrator(
    source: Arc<dyn MarketDataSource>,
    repo: Arc<dyn StockRepository>,
    workers: usize,
) -> MarketUpdateOrchestrator {
    let job = fast_job(source, Arc::clone(&repo));
    MarketUpdateOrchestrator::new(repo, job, StatusStore::new(), workers)
}
