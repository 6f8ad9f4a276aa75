//! Cycle scheduling
//!
//! Cycles are started by a periodic timer and on demand over HTTP. Only one
//! may run at a time: a trigger that arrives while a cycle is running is
//! skipped, never queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;

use crate::error::{Result, SyncError};
use crate::reconcile::{CycleSummary, ReconciliationEngine};

/// What started a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Periodic,
    Manual,
}

/// Outcome of the most recent cycle
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CycleReport {
    Completed(CycleSummary),
    Failed {
        error: String,
        #[serde(rename = "failedAt")]
        failed_at: DateTime<Utc>,
    },
}

pub struct CycleRunner {
    engine: Arc<ReconciliationEngine>,
    running: Mutex<()>,
    last: RwLock<Option<CycleReport>>,
}

impl CycleRunner {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self {
            engine,
            running: Mutex::new(()),
            last: RwLock::new(None),
        }
    }

    /// Run a cycle unless one is already running
    pub async fn trigger(&self, trigger: Trigger) -> Result<CycleSummary> {
        let _guard = self.running.try_lock().map_err(|_| {
            tracing::info!(?trigger, "Cycle already running, skipping trigger");
            SyncError::CycleInProgress
        })?;

        tracing::debug!(?trigger, "Starting sync cycle");
        let result = self.engine.run_cycle().await;

        let report = match &result {
            Ok(summary) => CycleReport::Completed(summary.clone()),
            Err(e) => CycleReport::Failed {
                error: e.to_string(),
                failed_at: Utc::now(),
            },
        };
        *self.last.write().await = Some(report);

        result
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    pub async fn last_report(&self) -> Option<CycleReport> {
        self.last.read().await.clone()
    }

    /// Start the periodic timer
    ///
    /// The first cycle runs immediately. Ticks missed while a cycle was
    /// running are dropped. The task exits once `shutdown` flips to true,
    /// after any in-flight cycle has finished.
    pub fn start_periodic(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        // Failures are already in the activity log; the next
                        // tick retries from the same cursor.
                        let _ = self.trigger(Trigger::Periodic).await;
                    }
                }
            }

            tracing::info!("Periodic sync stopped");
        })
    }
}
