//! Market update orchestrator.
//!
//! Runs refresh jobs for one segment or for every segment, with bounded
//! parallelism per segment, and reports progress through the
//! [`StatusStore`].
//!
//! # Segment lifecycle
//!
//! ```text
//! Idle ──trigger──▶ Running ──▶ Completed | PartiallyFailed | Failed
//!                      ▲                        │
//!                      └────────trigger─────────┘
//! ```
//!
//! At most one run per segment is in flight. A trigger that targets a running
//! segment fails with [`TriggerError::AlreadyRunning`]; the check and the
//! transition to `Running` happen under one lock.

mod poller;
mod status;

pub use poller::{wait_for_terminal, PollError};
pub use status::{SegmentStatus, StatusKey, StatusStore, TriggerError, UpdateStatus};

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use stockval_common::RefreshMode;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::data::{ParseSegmentError, Segment, StockRepository};
use crate::refresh::{JobCounts, JobFailure, JobOutcome, RefreshJob};

// ============================================================================
// Scope
// ============================================================================

/// What a trigger refreshes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Segment(Segment),
    All,
}

impl Scope {
    pub fn segments(&self) -> Vec<Segment> {
        match self {
            Self::Segment(segment) => vec![*segment],
            Self::All => Segment::ALL.to_vec(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Segment(segment) => write!(f, "{}", segment),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for Scope {
    type Err = ParseSegmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if stockval_common::validation::canonical_scope(s) == Some("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Segment)
        }
    }
}

/// Terminal status for a segment run with at least one job.
fn terminal_status(counts: &JobCounts) -> UpdateStatus {
    if counts.failed == 0 {
        UpdateStatus::Completed
    } else if counts.failed == counts.total {
        UpdateStatus::Failed
    } else {
        UpdateStatus::PartiallyFailed
    }
}

// ============================================================================
// Run Handle
// ============================================================================

/// An accepted run. Dropping the handle does not cancel the run.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: String,
    handle: JoinHandle<UpdateStatus>,
}

impl RunHandle {
    /// Wait for the run to finish and return its worst segment outcome.
    pub async fn wait(self) -> UpdateStatus {
        self.handle.await.unwrap_or_else(|e| {
            error!(run_id = %self.run_id, error = %e, "Refresh run aborted");
            UpdateStatus::Failed
        })
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Schedules refresh jobs per segment and tracks their progress.
#[derive(Clone)]
pub struct MarketUpdateOrchestrator {
    repository: Arc<dyn StockRepository>,
    job: RefreshJob,
    store: StatusStore,
    worker_pool_size: usize,
}

impl MarketUpdateOrchestrator {
    pub fn new(
        repository: Arc<dyn StockRepository>,
        job: RefreshJob,
        store: StatusStore,
        worker_pool_size: usize,
    ) -> Self {
        Self {
            repository,
            job,
            store,
            worker_pool_size: worker_pool_size.max(1),
        }
    }

    pub fn status_store(&self) -> &StatusStore {
        &self.store
    }

    /// Accept a watchlist run for `scope` and start it in the background.
    ///
    /// Returns as soon as the targeted segments are marked running.
    pub async fn trigger(&self, scope: Scope) -> Result<RunHandle, TriggerError> {
        self.trigger_with_mode(scope, RefreshMode::Watchlist).await
    }

    /// Like [`trigger`](Self::trigger), choosing which records the run covers.
    pub async fn trigger_with_mode(
        &self,
        scope: Scope,
        mode: RefreshMode,
    ) -> Result<RunHandle, TriggerError> {
        let segments = scope.segments();
        let include_overall = scope == Scope::All;
        let run_id = stockval_common::logging::generate_run_id();

        if let Err(e) = self
            .store
            .try_begin(&segments, include_overall, &run_id)
            .await
        {
            warn!(scope = %scope, error = %e, "Refresh trigger rejected");
            return Err(e);
        }
        info!(scope = %scope, mode = %mode, run_id = %run_id, "Refresh run accepted");

        let this = self.clone();
        let id = run_id.clone();
        let handle = tokio::spawn(async move { this.execute(segments, mode, id).await });

        Ok(RunHandle { run_id, handle })
    }

    pub async fn trigger_segment(&self, segment: Segment) -> Result<RunHandle, TriggerError> {
        self.trigger(Scope::Segment(segment)).await
    }

    pub async fn trigger_all(&self) -> Result<RunHandle, TriggerError> {
        self.trigger(Scope::All).await
    }

    /// Snapshot of every segment status plus `overall`.
    pub async fn get_status(&self) -> BTreeMap<StatusKey, SegmentStatus> {
        self.store.snapshot().await
    }

    /// Run every targeted segment concurrently; returns the worst outcome.
    async fn execute(self, segments: Vec<Segment>, mode: RefreshMode, run_id: String) -> UpdateStatus {
        let runs = segments
            .iter()
            .map(|&segment| self.run_segment(segment, mode, &run_id));
        let outcomes = futures::future::join_all(runs).await;

        let worst = outcomes
            .into_iter()
            .fold(UpdateStatus::Completed, UpdateStatus::worst);
        info!(run_id = %run_id, status = ?worst, "Refresh run finished");
        worst
    }

    async fn run_segment(&self, segment: Segment, mode: RefreshMode, run_id: &str) -> UpdateStatus {
        let listed = match mode {
            RefreshMode::Watchlist => self.repository.list(segment).await,
            RefreshMode::Full => self.repository.list_all(segment).await,
        };
        let symbols = match listed {
            Ok(symbols) => symbols,
            Err(e) => {
                error!(segment = %segment, error = %e, "Failed to list symbols");
                self.store
                    .publish(
                        segment,
                        SegmentStatus::new(
                            UpdateStatus::Failed,
                            100,
                            format!("failed to list symbols: {}", e),
                            run_id,
                        ),
                    )
                    .await;
                return UpdateStatus::Failed;
            }
        };

        let total = symbols.len();
        let mut counts = JobCounts::new(total);
        if total == 0 {
            info!(segment = %segment, "No symbols to update");
            self.store
                .publish(
                    segment,
                    SegmentStatus::new(UpdateStatus::Completed, 100, "no symbols to update", run_id)
                        .with_counts(counts),
                )
                .await;
            return UpdateStatus::Completed;
        }

        info!(segment = %segment, total, workers = self.worker_pool_size, "Updating segment");
        self.store
            .publish(
                segment,
                SegmentStatus::new(
                    UpdateStatus::Running,
                    0,
                    format!("updating 0/{}", total),
                    run_id,
                )
                .with_counts(counts),
            )
            .await;

        let mut results = stream::iter(symbols)
            .map(|symbol| {
                let job = self.job.clone();
                let task_symbol = symbol.clone();
                async move {
                    let joined =
                        tokio::spawn(async move { job.run(&task_symbol, segment).await }).await;
                    let outcome = joined
                        .unwrap_or_else(|e| JobOutcome::Failed(JobFailure::Aborted(e.to_string())));
                    (symbol, outcome)
                }
            })
            .buffer_unordered(self.worker_pool_size);

        while let Some((symbol, outcome)) = results.next().await {
            match &outcome {
                JobOutcome::Updated => debug!(segment = %segment, symbol = %symbol, "Symbol updated"),
                JobOutcome::SkippedNoData => {
                    debug!(segment = %segment, symbol = %symbol, "No data for symbol, skipped")
                }
                JobOutcome::Failed(reason) => {
                    warn!(segment = %segment, symbol = %symbol, error = %reason, "Symbol update failed")
                }
            }
            counts.record(&outcome);

            let done = counts.done();
            if done < total {
                let progress = (done * 100 / total) as u8;
                self.store
                    .publish(
                        segment,
                        SegmentStatus::new(
                            UpdateStatus::Running,
                            progress,
                            format!("updating {}/{}", done, total),
                            run_id,
                        )
                        .with_counts(counts),
                    )
                    .await;
            }
        }

        let status = terminal_status(&counts);
        let message = format!(
            "{} updated, {} skipped, {} failed of {}",
            counts.updated, counts.skipped, counts.failed, total
        );
        info!(
            segment = %segment,
            status = ?status,
            updated = counts.updated,
            skipped = counts.skipped,
            failed = counts.failed,
            "Segment update finished"
        );
        self.store
            .publish(
                segment,
                SegmentStatus::new(status, 100, message, run_id).with_counts(counts),
            )
            .await;
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parsing() {
        assert_eq!("all".parse::<Scope>().unwrap(), Scope::All);
        assert_eq!("ALL".parse::<Scope>().unwrap(), Scope::All);
        assert_eq!(
            "h_share".parse::<Scope>().unwrap(),
            Scope::Segment(Segment::HShare)
        );
        assert!("everything".parse::<Scope>().is_err());
        assert_eq!("全部".parse::<Scope>().unwrap(), Scope::All);
        assert_eq!(
            "美股".parse::<Scope>().unwrap(),
            Scope::Segment(Segment::UsShare)
        );
        for name in stockval_common::validation::VALID_SCOPES {
            assert!(name.parse::<Scope>().is_ok(), "{} rejected", name);
        }
        assert_eq!(Scope::All.segments().len(), 3);
        assert_eq!(Scope::Segment(Segment::AShare).to_string(), "a_share");
    }

    #[test]
    fn test_terminal_status_rules() {
        let counts = |updated, skipped, failed| JobCounts {
            total: updated + skipped + failed,
            updated,
            skipped,
            failed,
        };
        assert_eq!(terminal_status(&counts(0, 4, 0)), UpdateStatus::Completed);
        assert_eq!(terminal_status(&counts(3, 1, 0)), UpdateStatus::Completed);
        assert_eq!(terminal_status(&counts(2, 0, 1)), UpdateStatus::PartiallyFailed);
        assert_eq!(terminal_status(&counts(0, 0, 3)), UpdateStatus::Failed);
    }
}
