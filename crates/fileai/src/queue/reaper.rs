//! Periodic removal of finished jobs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::db::blocking;
use crate::error::QueueError;
use crate::queue::config::QueueConfig;
use crate::queue::job::JobState;
use crate::queue::store::JobStore;

/// Jobs removed by one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReapReport {
    pub completed_removed: usize,
    pub failed_removed: usize,
}

impl ReapReport {
    pub fn total(&self) -> usize {
        self.completed_removed + self.failed_removed
    }
}

/// Deletes Completed and Failed jobs once their retention has passed.
/// Waiting and Active jobs are never touched.
pub struct Reaper {
    store: Arc<JobStore>,
    completed_retention: Duration,
    failed_retention: Duration,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    stop_signal: Arc<Notify>,
}

impl Reaper {
    pub fn new(store: Arc<JobStore>, config: &QueueConfig) -> Self {
        Self {
            store,
            completed_retention: config.completed_retention,
            failed_retention: config.failed_retention,
            interval: config.reap_interval,
            shutdown: Arc::new(AtomicBool::new(false)),
            stop_signal: Arc::new(Notify::new()),
        }
    }

    /// Runs one pass, treating `now` as the current time.
    pub fn reap_once(&self, now: DateTime<Utc>) -> Result<ReapReport, QueueError> {
        let completed_removed = self
            .store
            .remove_finished_before(JobState::Completed, cutoff(now, self.completed_retention))?;
        let failed_removed = self
            .store
            .remove_finished_before(JobState::Failed, cutoff(now, self.failed_retention))?;

        let report = ReapReport {
            completed_removed,
            failed_removed,
        };
        if report.total() > 0 {
            log::info!(
                "Reaper removed {} completed and {} failed jobs",
                completed_removed,
                failed_removed
            );
        }
        Ok(report)
    }

    /// Starts the reap loop on the current tokio runtime. The first pass runs
    /// one `interval` after start.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let reaper = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(reaper.interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                if reaper.shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = interval_timer.tick() => {},
                    _ = reaper.stop_signal.notified() => {},
                }

                if reaper.shutdown.load(Ordering::Acquire) {
                    break;
                }

                let pass = Arc::clone(&reaper);
                if let Err(e) = blocking(move || pass.reap_once(Utc::now())).await {
                    log::error!("Reaper pass failed: {}", e);
                }
            }

            log::debug!("Reaper stopped");
        })
    }

    /// Signals the reap loop to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.stop_signal.notify_one();
    }
}

fn cutoff(now: DateTime<Utc>, retention: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(retention)
        .ok()
        .and_then(|retention| now.checked_sub_signed(retention))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
