//! Refresh job: the unit of work that updates one symbol.
//!
//! A job fetches the latest quote, merges it into the stored record,
//! recomputes the valuation bands from the record's own assumptions and
//! writes the record back. Transient fetch failures are retried with
//! exponential backoff; the whole job, retries included, is bounded by a
//! timeout.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use stockval_common::RefreshConfig;
use thiserror::Error;
use tracing::{debug, warn};

use crate::data::{FetchError, MarketDataSource, Quote, Segment, StockRecord, StockRepository};
use crate::valuation::ValuationEngine;

// ============================================================================
// Outcome
// ============================================================================

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("fetch failed after {attempts} attempt(s): {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: FetchError,
    },

    #[error("repository error: {0}")]
    Repository(String),

    #[error("job aborted: {0}")]
    Aborted(String),
}

/// Per-symbol result of a refresh job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Quote merged and record written
    Updated,
    /// Source has no data for the symbol; the record is left stale
    SkippedNoData,
    Failed(JobFailure),
}

impl JobOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Tally of job outcomes for one segment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub total: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &JobOutcome) {
        match outcome {
            JobOutcome::Updated => self.updated += 1,
            JobOutcome::SkippedNoData => self.skipped += 1,
            JobOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn done(&self) -> usize {
        self.updated + self.skipped + self.failed
    }
}

// ============================================================================
// Retry Policy
// ============================================================================

/// Bounded retry with exponential backoff for transient fetch errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure; doubled after each subsequent one
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

// ============================================================================
// Refresh Job
// ============================================================================

/// Refreshes one symbol at a time. Cheap to clone; clones share collaborators.
#[derive(Clone)]
pub struct RefreshJob {
    source: Arc<dyn MarketDataSource>,
    repository: Arc<dyn StockRepository>,
    engine: ValuationEngine,
    retry: RetryPolicy,
    timeout: Duration,
}

impl RefreshJob {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        repository: Arc<dyn StockRepository>,
        engine: ValuationEngine,
    ) -> Self {
        Self {
            source,
            repository,
            engine,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Apply retry and timeout limits from configuration.
    pub fn with_config(self, config: &RefreshConfig) -> Self {
        self.with_retry(RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        })
        .with_timeout(config.job_timeout())
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the job for one symbol. Never panics on collaborator errors.
    pub async fn run(&self, symbol: &str, market: Segment) -> JobOutcome {
        match tokio::time::timeout(self.timeout, self.execute(symbol, market)).await {
            Ok(outcome) => outcome,
            Err(_) => JobOutcome::Failed(JobFailure::Timeout(self.timeout)),
        }
    }

    async fn execute(&self, symbol: &str, market: Segment) -> JobOutcome {
        let quote = match self.fetch_with_retry(symbol, market).await {
            Ok(quote) => quote,
            Err((_, FetchError::NotFound { .. })) => return JobOutcome::SkippedNoData,
            Err((attempts, source)) => {
                return JobOutcome::Failed(JobFailure::Fetch { attempts, source })
            }
        };

        match self.persist(symbol, market, &quote).await {
            Ok(true) => JobOutcome::Updated,
            Ok(false) => JobOutcome::SkippedNoData,
            Err(failure) => JobOutcome::Failed(failure),
        }
    }

    /// Fetch, retrying transient errors. On failure returns the attempts made.
    async fn fetch_with_retry(
        &self,
        symbol: &str,
        market: Segment,
    ) -> Result<Quote, (u32, FetchError)> {
        let mut attempt = 1;
        loop {
            match self.source.fetch(symbol, market).await {
                Ok(quote) => return Ok(quote),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let backoff = self.retry.delay_after(attempt);
                    warn!(
                        symbol,
                        segment = %market,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err((attempt, e)),
            }
        }
    }

    /// Merge the quote into the stored record and write it back.
    ///
    /// Returns `Ok(false)` when the record no longer exists.
    async fn persist(
        &self,
        symbol: &str,
        market: Segment,
        quote: &Quote,
    ) -> Result<bool, JobFailure> {
        let Some(mut record) = self
            .repository
            .get(symbol, market)
            .await
            .map_err(|e| JobFailure::Repository(e.to_string()))?
        else {
            debug!(symbol, segment = %market, "Record removed during refresh, skipping");
            return Ok(false);
        };

        record.apply_quote(quote);
        self.revalue(&mut record);
        record.last_updated = Utc::now();

        self.repository
            .upsert(&record)
            .await
            .map_err(|e| JobFailure::Repository(e.to_string()))?;
        Ok(true)
    }

    /// Recompute valuation bands. Invalid fundamentals keep the previous bands.
    fn revalue(&self, record: &mut StockRecord) {
        let Some(inputs) = record.valuation_inputs() else {
            return;
        };
        match self.engine.compute(&inputs) {
            Ok(result) => record.apply_valuation(&result),
            Err(e) => warn!(
                symbol = %record.symbol,
                segment = %record.market,
                error = %e,
                "Skipping valuation for record"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{InMemoryRepository, RepositoryError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Returns scripted results in order, then repeats the last one.
    struct ScriptedSource {
        script: Mutex<Vec<Result<Quote, FetchError>>>,
        calls: AtomicU32,
        delay: Duration,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Quote, FetchError>>) -> Self {
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch(&self, _symbol: &str, _market: Segment) -> Result<Quote, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    struct BrokenRepository;

    #[async_trait]
    impl StockRepository for BrokenRepository {
        async fn list(&self, _: Segment) -> Result<Vec<String>, RepositoryError> {
            Err(RepositoryError::Backend("disk full".into()))
        }
        async fn get(&self, s: &str, m: Segment) -> Result<Option<StockRecord>, RepositoryError> {
            Ok(Some(StockRecord::new(s, m)))
        }
        async fn records(&self, _: Option<Segment>) -> Result<Vec<StockRecord>, RepositoryError> {
            Ok(Vec::new())
        }
        async fn upsert(&self, _: &StockRecord) -> Result<(), RepositoryError> {
            Err(RepositoryError::Backend("disk full".into()))
        }
        async fn delete(&self, _: &str, _: Segment) -> Result<bool, RepositoryError> {
            Ok(false)
        }
    }

    fn quote() -> Quote {
        Quote {
            symbol: "SH600519".into(),
            name: Some("贵州茅台".into()),
            price: Some(1500.0),
            pe: Some(22.0),
            eps: Some(33.275),
            book_value_per_share: Some(133.1),
            roe: Some(0.25),
            ..Default::default()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    fn job(source: Arc<ScriptedSource>, repo: Arc<dyn StockRepository>) -> RefreshJob {
        RefreshJob::new(source, repo, ValuationEngine::default()).with_retry(fast_retry())
    }

    fn repo_with(symbol: &str) -> Arc<InMemoryRepository> {
        Arc::new(InMemoryRepository::with_records([StockRecord::new(
            symbol,
            Segment::AShare,
        )]))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_success_updates_record_and_valuation() {
        let repo = repo_with("600519");
        let source = Arc::new(ScriptedSource::new(vec![Ok(quote())]));

        let outcome = job(source.clone(), repo.clone()).run("600519", Segment::AShare).await;
        assert_eq!(outcome, JobOutcome::Updated);

        let stored = repo.get("600519", Segment::AShare).await.unwrap().unwrap();
        assert_eq!(stored.name, "贵州茅台");
        assert_eq!(stored.current_price, Some(1500.0));
        assert!((stored.theoretical_price_mid.unwrap() - 418.314_285_7).abs() < 1e-6);
        assert!(stored.pe_ratio_lower.unwrap() < stored.pe_ratio_upper.unwrap());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_skipped_without_retry() {
        let repo = repo_with("XXXX");
        let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::NotFound {
            symbol: "XXXX".into(),
        })]));

        let outcome = job(source.clone(), repo.clone()).run("XXXX", Segment::AShare).await;
        assert_eq!(outcome, JobOutcome::SkippedNoData);
        assert_eq!(source.calls(), 1);

        let stored = repo.get("XXXX", Segment::AShare).await.unwrap().unwrap();
        assert!(stored.current_price.is_none());
    }

    #[tokio::test]
    async fn test_transient_error_retried_then_succeeds() {
        let repo = repo_with("600519");
        let source = Arc::new(ScriptedSource::new(vec![
            Err(FetchError::TransientUnavailable("503".into())),
            Err(FetchError::TransientUnavailable("503".into())),
            Ok(quote()),
        ]));

        let outcome = job(source.clone(), repo).run("600519", Segment::AShare).await;
        assert_eq!(outcome, JobOutcome::Updated);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_error_exhausts_attempts() {
        let repo = repo_with("600519");
        let source = Arc::new(ScriptedSource::new(vec![Err(
            FetchError::TransientUnavailable("connection reset".into()),
        )]));

        let outcome = job(source.clone(), repo).run("600519", Segment::AShare).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(JobFailure::Fetch { attempts: 3, .. })
        ));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_rejected_error_not_retried() {
        let repo = repo_with("600519");
        let source = Arc::new(ScriptedSource::new(vec![Err(FetchError::Rejected(
            "HTTP 401".into(),
        ))]));

        let outcome = job(source.clone(), repo).run("600519", Segment::AShare).await;
        assert!(matches!(
            outcome,
            JobOutcome::Failed(JobFailure::Fetch { attempts: 1, .. })
        ));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_repository_write_failure_is_failed() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(quote())]));
        let outcome = job(source, Arc::new(BrokenRepository))
            .run("600519", Segment::AShare)
            .await;
        assert!(matches!(outcome, JobOutcome::Failed(JobFailure::Repository(_))));
    }

    #[tokio::test]
    async fn test_timeout_bounds_retries() {
        let repo = repo_with("600519");
        let mut slow = ScriptedSource::new(vec![Err(FetchError::TransientUnavailable(
            "slow".into(),
        ))]);
        slow.delay = Duration::from_millis(50);

        let outcome = job(Arc::new(slow), repo)
            .with_retry(RetryPolicy {
                max_attempts: 10,
                backoff: Duration::from_millis(50),
            })
            .with_timeout(Duration::from_millis(120))
            .run("600519", Segment::AShare)
            .await;
        assert_eq!(
            outcome,
            JobOutcome::Failed(JobFailure::Timeout(Duration::from_millis(120)))
        );
    }

    #[tokio::test]
    async fn test_invalid_fundamentals_keep_previous_bands() {
        let mut record = StockRecord::new("000001", Segment::AShare);
        record.pe_ratio_lower = Some(5.0);
        let repo = Arc::new(InMemoryRepository::with_records([record]));

        let mut bad = quote();
        bad.roe = Some(-0.05);
        let source = Arc::new(ScriptedSource::new(vec![Ok(bad)]));

        let outcome = job(source, repo.clone()).run("000001", Segment::AShare).await;
        assert_eq!(outcome, JobOutcome::Updated);
        let stored = repo.get("000001", Segment::AShare).await.unwrap().unwrap();
        assert_eq!(stored.pe_ratio_lower, Some(5.0));
        assert_eq!(stored.roe, Some(-0.05));
    }

    #[tokio::test]
    async fn test_deleted_record_is_skipped() {
        let repo = Arc::new(InMemoryRepository::new());
        let source = Arc::new(ScriptedSource::new(vec![Ok(quote())]));

        let outcome = job(source, repo.clone()).run("600519", Segment::AShare).await;
        assert_eq!(outcome, JobOutcome::SkippedNoData);
        assert!(repo.records(None).await.unwrap().is_empty());
    }

    #[test]
    fn test_counts() {
        let mut counts = JobCounts::new(3);
        counts.record(&JobOutcome::Updated);
        counts.record(&JobOutcome::SkippedNoData);
        counts.record(&JobOutcome::Failed(JobFailure::Aborted("panic".into())));
        assert_eq!(counts.done(), 3);
        assert_eq!((counts.updated, counts.skipped, counts.failed), (1, 1, 1));
    }
}
