//! Process-wide refresh status.
//!
//! One [`SegmentStatus`] per market segment plus the reserved `overall` entry,
//! all behind a single lock. Readers take consistent snapshots. Only the
//! orchestrator writes; the write methods are crate-private.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::data::Segment;
use crate::refresh::JobCounts;

// ============================================================================
// Status Types
// ============================================================================

/// Lifecycle state of a segment refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Idle,
    Running,
    Completed,
    PartiallyFailed,
    Failed,
}

impl UpdateStatus {
    /// No further transition happens without a new trigger.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::PartiallyFailed | Self::Failed)
    }

    /// Ordering used to pick the worst outcome: Failed > PartiallyFailed > Completed.
    fn severity(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Completed => 1,
            Self::Running => 2,
            Self::PartiallyFailed => 3,
            Self::Failed => 4,
        }
    }

    /// The more severe of two outcomes.
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "空闲"),
            Self::Running => write!(f, "进行中"),
            Self::Completed => write!(f, "完成"),
            Self::PartiallyFailed => write!(f, "部分失败"),
            Self::Failed => write!(f, "失败"),
        }
    }
}

/// Status of one segment (or the overall aggregate).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentStatus {
    pub status: UpdateStatus,
    /// Human-readable progress note
    pub message: String,
    /// Percent complete, 0-100
    pub progress: u8,
    /// Run that last wrote this entry
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<JobCounts>,
    pub updated_at: DateTime<Utc>,
}

impl SegmentStatus {
    pub fn idle() -> Self {
        Self {
            status: UpdateStatus::Idle,
            message: "idle".into(),
            progress: 0,
            run_id: None,
            counts: None,
            updated_at: Utc::now(),
        }
    }

    pub fn new(status: UpdateStatus, progress: u8, message: impl Into<String>, run_id: &str) -> Self {
        Self {
            status,
            message: message.into(),
            progress: progress.min(100),
            run_id: Some(run_id.to_string()),
            counts: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_counts(mut self, counts: JobCounts) -> Self {
        self.counts = Some(counts);
        self
    }
}

/// Key into the status store: a segment or the reserved `overall` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StatusKey {
    Segment(Segment),
    Overall,
}

impl StatusKey {
    pub const OVERALL: &'static str = "overall";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segment(segment) => segment.key(),
            Self::Overall => Self::OVERALL,
        }
    }
}

impl std::fmt::Display for StatusKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Segment> for StatusKey {
    fn from(segment: Segment) -> Self {
        Self::Segment(segment)
    }
}

impl Serialize for StatusKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A trigger was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TriggerError {
    #[error("update already running for {key}")]
    AlreadyRunning { key: StatusKey },
}

impl From<TriggerError> for stockval_common::Error {
    fn from(err: TriggerError) -> Self {
        Self::Conflict(err.to_string())
    }
}

// ============================================================================
// Status Store
// ============================================================================

/// Segment statuses of the `All` run currently feeding the overall entry.
#[derive(Debug)]
struct OverallRun {
    run_id: String,
    members: BTreeMap<Segment, SegmentStatus>,
}

impl OverallRun {
    fn aggregate(&self) -> SegmentStatus {
        let n = self.members.len().max(1);
        let progress_sum: usize = self.members.values().map(|s| s.progress as usize).sum();
        let finished = self.members.values().filter(|s| s.status.is_terminal()).count();

        if finished == self.members.len() {
            let worst = self
                .members
                .values()
                .fold(UpdateStatus::Completed, |acc, s| acc.worst(s.status));
            let message = match worst {
                UpdateStatus::Completed => "all segments completed".to_string(),
                UpdateStatus::PartiallyFailed => "some symbols failed to update".to_string(),
                _ => "one or more segments failed".to_string(),
            };
            SegmentStatus::new(worst, 100, message, &self.run_id)
        } else {
            SegmentStatus::new(
                UpdateStatus::Running,
                (progress_sum / n) as u8,
                format!("{}/{} segments finished", finished, self.members.len()),
                &self.run_id,
            )
        }
    }
}

#[derive(Debug)]
struct Inner {
    statuses: HashMap<StatusKey, SegmentStatus>,
    overall_run: Option<OverallRun>,
}

/// Shared, cloneable handle to the status map.
#[derive(Debug, Clone)]
pub struct StatusStore {
    inner: Arc<RwLock<Inner>>,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore {
    /// Every known segment and `overall` start out idle.
    pub fn new() -> Self {
        let statuses = Segment::ALL
            .iter()
            .map(|&s| StatusKey::Segment(s))
            .chain(std::iter::once(StatusKey::Overall))
            .map(|k| (k, SegmentStatus::idle()))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(Inner {
                statuses,
                overall_run: None,
            })),
        }
    }

    pub async fn get(&self, key: StatusKey) -> SegmentStatus {
        let inner = self.inner.read().await;
        inner
            .statuses
            .get(&key)
            .cloned()
            .unwrap_or_else(SegmentStatus::idle)
    }

    /// Consistent copy of every entry.
    pub async fn snapshot(&self) -> BTreeMap<StatusKey, SegmentStatus> {
        let inner = self.inner.read().await;
        inner
            .statuses
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    /// Atomically mark `segments` as running, or refuse if any already is.
    ///
    /// With `include_overall`, the overall entry starts tracking this run.
    pub(crate) async fn try_begin(
        &self,
        segments: &[Segment],
        include_overall: bool,
        run_id: &str,
    ) -> Result<(), TriggerError> {
        let mut inner = self.inner.write().await;

        let mut keys: Vec<StatusKey> = segments.iter().map(|&s| StatusKey::Segment(s)).collect();
        if include_overall {
            keys.push(StatusKey::Overall);
        }
        if let Some(&key) = keys.iter().find(|k| {
            inner
                .statuses
                .get(*k)
                .is_some_and(|s| s.status == UpdateStatus::Running)
        }) {
            return Err(TriggerError::AlreadyRunning { key });
        }

        let starting = SegmentStatus::new(UpdateStatus::Running, 0, "starting", run_id);
        for &segment in segments {
            inner
                .statuses
                .insert(StatusKey::Segment(segment), starting.clone());
        }

        if include_overall {
            let run = OverallRun {
                run_id: run_id.to_string(),
                members: segments.iter().map(|&s| (s, starting.clone())).collect(),
            };
            inner.statuses.insert(StatusKey::Overall, run.aggregate());
            inner.overall_run = Some(run);
        }
        Ok(())
    }

    /// Write a segment's status and, if it belongs to the tracked `All`
    /// run, recompute the overall entry under the same lock.
    pub(crate) async fn publish(&self, segment: Segment, status: SegmentStatus) {
        let mut inner = self.inner.write().await;
        let Inner {
            statuses,
            overall_run,
        } = &mut *inner;

        if let Some(run) = overall_run.as_mut() {
            if status.run_id.as_deref() == Some(run.run_id.as_str()) {
                if let Some(member) = run.members.get_mut(&segment) {
                    *member = status.clone();
                    statuses.insert(StatusKey::Overall, run.aggregate());
                }
            }
        }
        statuses.insert(StatusKey::Segment(segment), status);
    }
}
