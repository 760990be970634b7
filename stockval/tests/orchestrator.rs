//! Integration tests for refresh runs.
//!
//! Drives the orchestrator over in-memory collaborators and checks the
//! status store contract: single flight per segment, progress, and terminal
//! outcomes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{orchestrator, quote, records, Answer, FakeSource, ListFailingRepository};
use stockval::data::{InMemoryRepository, Segment, StockRecord, StockRepository};
use stockval::orchestrator::{
    wait_for_terminal, Scope, StatusKey, TriggerError, UpdateStatus,
};
use stockval_common::RefreshMode;

const DEADLINE: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(5);

fn repo(market: Segment, symbols: &[&str]) -> Arc<dyn StockRepository> {
    Arc::new(InMemoryRepository::with_records(records(market, symbols)))
}

// ============================================================================
// Single Flight
// ============================================================================

#[tokio::test]
async fn test_trigger_rejected_while_running_then_accepted() {
    let source = Arc::new(
        FakeSource::new()
            .with("600519", Answer::Quote(quote("600519", 1500.0)))
            .with_delay(Duration::from_millis(100)),
    );
    let orch = orchestrator(source, repo(Segment::AShare, &["600519"]), 2);

    let first = orch.trigger_segment(Segment::AShare).await.unwrap();
    let second = orch.trigger_segment(Segment::AShare).await;
    assert_eq!(
        second.unwrap_err(),
        TriggerError::AlreadyRunning {
            key: StatusKey::Segment(Segment::AShare)
        }
    );

    assert_eq!(first.wait().await, UpdateStatus::Completed);
    let third = orch.trigger_segment(Segment::AShare).await;
    assert!(third.is_ok());
    third.unwrap().wait().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_accept_exactly_one() {
    let source = Arc::new(FakeSource::new().with_delay(Duration::from_millis(50)));
    let orch = orchestrator(source, repo(Segment::HShare, &["00700"]), 2);

    for round in 0..20 {
        let triggers: Vec<_> = (0..8)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        orch.trigger_segment(Segment::HShare).await
                    } else {
                        orch.trigger(Scope::All).await
                    }
                })
            })
            .collect();

        let mut accepted = Vec::new();
        for trigger in triggers {
            if let Ok(handle) = trigger.await.unwrap() {
                accepted.push(handle);
            }
        }
        assert_eq!(accepted.len(), 1, "round {}", round);

        for handle in accepted {
            handle.wait().await;
        }
    }
}

#[tokio::test]
async fn test_full_mode_includes_paused_records() {
    let mut paused = StockRecord::new("MSFT", Segment::UsShare);
    paused.auto_update = false;
    let mut rows = records(Segment::UsShare, &["AAPL"]);
    rows.push(paused);
    let source = Arc::new(FakeSource::new());
    let repository: Arc<dyn StockRepository> = Arc::new(InMemoryRepository::with_records(rows));
    let orch = orchestrator(source.clone(), repository, 2);

    let watchlist = orch
        .trigger_with_mode(Scope::Segment(Segment::UsShare), RefreshMode::Watchlist)
        .await
        .unwrap();
    watchlist.wait().await;
    assert_eq!(source.call_count(), 1);

    let full = orch
        .trigger_with_mode(Scope::Segment(Segment::UsShare), RefreshMode::Full)
        .await
        .unwrap();
    full.wait().await;
    assert_eq!(source.call_count(), 3);

    let status = orch
        .status_store()
        .get(StatusKey::Segment(Segment::UsShare))
        .await;
    assert_eq!(status.counts.map(|c| c.total), Some(2));
}

#[tokio::test]
async fn test_all_rejected_when_any_segment_running() {
    let source = Arc::new(FakeSource::new().with_delay(Duration::from_millis(80)));
    let orch = orchestrator(source, repo(Segment::UsShare, &["AAPL"]), 2);

    let us = orch.trigger_segment(Segment::UsShare).await.unwrap();
    assert!(matches!(
        orch.trigger_all().await,
        Err(TriggerError::AlreadyRunning { .. })
    ));

    // A different segment is still free
    let a_share = orch.trigger_segment(Segment::AShare).await.unwrap();
    a_share.wait().await;
    us.wait().await;
}

#[tokio::test]
async fn test_trigger_returns_before_jobs_finish() {
    let source = Arc::new(
        FakeSource::new()
            .with("AAPL", Answer::Quote(quote("AAPL", 190.0)))
            .with_delay(Duration::from_millis(200)),
    );
    let orch = orchestrator(source, repo(Segment::UsShare, &["AAPL"]), 1);

    let started = std::time::Instant::now();
    let handle = orch.trigger_segment(Segment::UsShare).await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(150));

    let status = orch
        .status_store()
        .get(StatusKey::Segment(Segment::UsShare))
        .await;
    assert_eq!(status.status, UpdateStatus::Running);
    assert_eq!(status.run_id.as_deref(), Some(handle.run_id.as_str()));
    handle.wait().await;
}

// ============================================================================
// Terminal Outcomes
// ============================================================================

#[tokio::test]
async fn test_all_skipped_is_completed() {
    let source = Arc::new(FakeSource::new());
    let orch = orchestrator(source, repo(Segment::AShare, &["000001", "000002"]), 4);

    let handle = orch.trigger_segment(Segment::AShare).await.unwrap();
    assert_eq!(handle.wait().await, UpdateStatus::Completed);

    let status = orch
        .status_store()
        .get(StatusKey::Segment(Segment::AShare))
        .await;
    assert_eq!(status.progress, 100);
    let counts = status.counts.unwrap();
    assert_eq!((counts.updated, counts.skipped, counts.failed), (0, 2, 0));
}

#[tokio::test]
async fn test_some_failures_is_partially_failed() {
    let source = Arc::new(
        FakeSource::new()
            .with("600519", Answer::Quote(quote("600519", 1500.0)))
            .with("000858", Answer::Quote(quote("000858", 150.0)))
            .with("601318", Answer::Transient)
            .with("600036", Answer::Rejected),
    );
    let repository = repo(Segment::AShare, &["600519", "000858", "601318", "600036"]);
    let orch = orchestrator(source.clone(), repository.clone(), 2);

    let handle = orch.trigger_segment(Segment::AShare).await.unwrap();
    assert_eq!(handle.wait().await, UpdateStatus::PartiallyFailed);

    let status = orch
        .status_store()
        .get(StatusKey::Segment(Segment::AShare))
        .await;
    assert_eq!(status.status, UpdateStatus::PartiallyFailed);
    assert_eq!(status.progress, 100);
    let counts = status.counts.unwrap();
    assert_eq!((counts.total, counts.updated, counts.failed), (4, 2, 2));

    // Transient retried once more, rejected never retried
    assert_eq!(source.call_count(), 2 + 2 + 1);

    let record = repository
        .get("600519", Segment::AShare)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.current_price, Some(1500.0));
    let mid = record.theoretical_price_mid.unwrap();
    assert!((mid - 418.3142857142857).abs() < 1e-6);
}

#[tokio::test]
async fn test_every_job_failing_is_failed() {
    let source = Arc::new(
        FakeSource::new()
            .with("AAPL", Answer::Rejected)
            .with("MSFT", Answer::Rejected),
    );
    let orch = orchestrator(source, repo(Segment::UsShare, &["AAPL", "MSFT"]), 2);

    let handle = orch.trigger_segment(Segment::UsShare).await.unwrap();
    assert_eq!(handle.wait().await, UpdateStatus::Failed);
}

#[tokio::test]
async fn test_empty_segment_completes_immediately() {
    let source = Arc::new(FakeSource::new());
    let orch = orchestrator(source.clone(), repo(Segment::AShare, &[]), 2);

    let handle = orch.trigger_segment(Segment::HShare).await.unwrap();
    assert_eq!(handle.wait().await, UpdateStatus::Completed);

    let status = orch
        .status_store()
        .get(StatusKey::Segment(Segment::HShare))
        .await;
    assert_eq!(status.progress, 100);
    assert_eq!(source.call_count(), 0);
}

#[tokio::test]
async fn test_list_failure_marks_segment_failed() {
    let inner = InMemoryRepository::with_records(records(Segment::HShare, &["00700"]));
    let repository: Arc<dyn StockRepository> =
        Arc::new(ListFailingRepository::new(inner, &[Segment::HShare]));
    let orch = orchestrator(Arc::new(FakeSource::new()), repository, 2);

    let handle = orch.trigger_segment(Segment::HShare).await.unwrap();
    assert_eq!(handle.wait().await, UpdateStatus::Failed);

    let status = orch
        .status_store()
        .get(StatusKey::Segment(Segment::HShare))
        .await;
    assert_eq!(status.status, UpdateStatus::Failed);
    assert_eq!(status.progress, 100);
    assert!(status.message.contains("database is locked"));

    // The segment can be retried
    assert!(orch.trigger_segment(Segment::HShare).await.is_ok());
}

// ============================================================================
// Aggregate And Progress
// ============================================================================

#[tokio::test]
async fn test_overall_takes_worst_segment_outcome() {
    let mut all = records(Segment::AShare, &["600519"]);
    all.extend(records(Segment::HShare, &["00700"]));
    let repository: Arc<dyn StockRepository> = Arc::new(InMemoryRepository::with_records(all));
    let source = Arc::new(
        FakeSource::new()
            .with("600519", Answer::Quote(quote("600519", 1500.0)))
            .with("00700", Answer::Rejected),
    );
    let orch = orchestrator(source, repository, 2);

    let handle = orch.trigger_all().await.unwrap();
    let overall = wait_for_terminal(orch.status_store(), StatusKey::Overall, POLL, DEADLINE)
        .await
        .unwrap();
    assert_eq!(overall.status, UpdateStatus::Failed);
    assert_eq!(overall.progress, 100);
    assert_eq!(handle.wait().await, UpdateStatus::Failed);

    let snapshot = orch.get_status().await;
    assert_eq!(
        snapshot[&StatusKey::Segment(Segment::AShare)].status,
        UpdateStatus::Completed
    );
    assert_eq!(
        snapshot[&StatusKey::Segment(Segment::HShare)].status,
        UpdateStatus::Failed
    );
    assert_eq!(
        snapshot[&StatusKey::Segment(Segment::UsShare)].status,
        UpdateStatus::Completed
    );
}

#[tokio::test]
async fn test_segment_run_leaves_overall_alone() {
    let source = Arc::new(FakeSource::new());
    let orch = orchestrator(source, repo(Segment::AShare, &["000001"]), 1);

    orch.trigger_segment(Segment::AShare)
        .await
        .unwrap()
        .wait()
        .await;
    let overall = orch.status_store().get(StatusKey::Overall).await;
    assert_eq!(overall.status, UpdateStatus::Idle);
}

#[tokio::test]
async fn test_progress_never_decreases() {
    let symbols = ["A1", "A2", "A3", "A4", "A5", "A6"];
    let mut source = FakeSource::new().with_delay(Duration::from_millis(20));
    for s in symbols {
        source = source.with(s, Answer::Quote(quote(s, 10.0)));
    }
    let orch = orchestrator(Arc::new(source), repo(Segment::AShare, &symbols), 1);
    let key = StatusKey::Segment(Segment::AShare);

    let handle = orch.trigger_segment(Segment::AShare).await.unwrap();
    let mut seen = Vec::new();
    loop {
        let status = orch.status_store().get(key).await;
        seen.push(status.progress);
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(POLL).await;
    }
    handle.wait().await;

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", seen);
    assert_eq!(seen.last(), Some(&100));
    assert!(seen.iter().any(|p| *p > 0 && *p < 100));
}
