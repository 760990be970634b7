//! Cron-driven background refresh.
//!
//! Each configured entry pairs a cron expression (with a leading seconds
//! field) with a refresh scope and mode. The loop wakes every 10 seconds and
//! fires any entry whose scheduled time passed within the last minute.
//!
//! # Schedule Configuration
//!
//! ```json
//! {
//!   "schedule": {
//!     "enabled": true,
//!     "entries": [
//!       { "cron": "0 0 * * * *", "scope": "all" },
//!       { "cron": "0 30 2 * * *", "scope": "all", "mode": "full" }
//!     ]
//!   }
//! }
//! ```
//!
//! A `watchlist` entry refreshes records with auto-update on, a `full` entry
//! refreshes every record. A firing that collides with a run already in
//! progress is skipped, not retried.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use stockval_common::{RefreshMode, ScheduleConfig};
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::orchestrator::{MarketUpdateOrchestrator, Scope, TriggerError};

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Stopped,
    Running,
}

/// A parsed schedule entry
struct ParsedEntry {
    cron: String,
    scope: Scope,
    mode: RefreshMode,
    schedule: Schedule,
}

/// Whether `schedule` has a firing in the last minute not yet covered by `last_exec`.
fn is_due(schedule: &Schedule, last_exec: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let after = last_exec.unwrap_or_else(|| now - chrono::Duration::hours(1));

    for scheduled in schedule.after(&after).take(10) {
        if scheduled > now {
            break;
        }
        if now.signed_duration_since(scheduled) < chrono::Duration::seconds(60) {
            if matches!(last_exec, Some(last) if last >= scheduled) {
                continue;
            }
            return true;
        }
    }

    false
}

/// Background refresh scheduler
pub struct RefreshScheduler {
    enabled: bool,
    orchestrator: MarketUpdateOrchestrator,
    entries: Vec<ParsedEntry>,
    state: Arc<RwLock<SchedulerState>>,
    /// Last firing time per entry index
    last_executions: Arc<RwLock<HashMap<usize, DateTime<Utc>>>>,
}

impl RefreshScheduler {
    pub fn new(config: &ScheduleConfig, orchestrator: MarketUpdateOrchestrator) -> Result<Self> {
        let mut entries = Vec::with_capacity(config.entries.len());
        for entry in &config.entries {
            let schedule = Schedule::from_str(&entry.cron)
                .with_context(|| format!("Invalid schedule cron: {}", entry.cron))?;
            let scope = Scope::from_str(&entry.scope)
                .with_context(|| format!("Invalid schedule scope: {}", entry.scope))?;
            entries.push(ParsedEntry {
                cron: entry.cron.clone(),
                scope,
                mode: entry.mode,
                schedule,
            });
        }

        if config.enabled {
            for entry in &entries {
                info!(cron = %entry.cron, scope = %entry.scope, mode = %entry.mode, "Refresh scheduled");
            }
        }

        Ok(Self {
            enabled: config.enabled,
            orchestrator,
            entries,
            state: Arc::new(RwLock::new(SchedulerState::Stopped)),
            last_executions: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Ask the loop to exit at its next tick.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        *state = SchedulerState::Stopped;
        info!("Scheduler stopped");
    }

    /// Run the scheduler loop until stopped
    pub async fn run(&self) -> Result<()> {
        if !self.enabled || self.entries.is_empty() {
            info!("Scheduler disabled, not starting");
            return Ok(());
        }

        {
            let mut state = self.state.write().await;
            *state = SchedulerState::Running;
        }

        info!("Scheduler started");

        // Check every 10 seconds
        let mut check_interval = interval(Duration::from_secs(10));

        loop {
            check_interval.tick().await;

            if *self.state.read().await == SchedulerState::Stopped {
                break;
            }
            self.check_and_execute(Utc::now()).await;
        }

        Ok(())
    }

    /// Fire every due entry. Returns the number of accepted runs.
    pub async fn check_and_execute(&self, now: DateTime<Utc>) -> usize {
        let mut accepted = 0;

        for (index, entry) in self.entries.iter().enumerate() {
            let last_exec = {
                let executions = self.last_executions.read().await;
                executions.get(&index).copied()
            };
            if !is_due(&entry.schedule, last_exec, now) {
                continue;
            }

            {
                let mut executions = self.last_executions.write().await;
                executions.insert(index, now);
            }

            debug!(cron = %entry.cron, scope = %entry.scope, "Executing scheduled refresh");
            match self.orchestrator.trigger_with_mode(entry.scope, entry.mode).await {
                Ok(handle) => {
                    info!(scope = %entry.scope, mode = %entry.mode, run_id = %handle.run_id, "Scheduled refresh started");
                    accepted += 1;
                }
                Err(TriggerError::AlreadyRunning { key }) => {
                    warn!(scope = %entry.scope, running = %key, "Refresh already running, skipping scheduled firing");
                }
            }
        }

        accepted
    }
}
