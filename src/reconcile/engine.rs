//! One synchronization cycle
//!
//! Load state, fetch one batch of changes, route every step upsert to the
//! correction that applies to its source, then persist the new cursor and
//! write a summary to the activity log.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use super::quirk::{QuirkCorrector, QUIRK_SCOPE};
use super::rewrite::IdempotentRewriter;
use super::source::{SourceKind, SourceRouter};
use crate::error::{Result, SyncError};
use crate::feed::ChangeFeedClient;
use crate::log_sink::{ActivityLog, LogSink};
use crate::prefs::{EngineState, PreferenceStore};
use crate::records::{ChangeEvent, RecordType};

/// Outcome of a completed cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    #[serde(rename = "cycleId")]
    pub cycle_id: Uuid,
    /// Events in the fetched batch, of any kind
    #[serde(rename = "eventsSeen")]
    pub events_seen: usize,
    /// Records handed to a correction
    pub rewritten: usize,
    #[serde(rename = "totalSteps")]
    pub total_steps: u64,
    #[serde(rename = "cursorAdvanced")]
    pub cursor_advanced: bool,
    /// More changes were pending beyond this batch
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
    #[serde(rename = "finishedAt")]
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BatchTotals {
    rewritten: usize,
    total_steps: u64,
}

pub struct ReconciliationEngine {
    feed: Arc<dyn ChangeFeedClient>,
    prefs: Arc<dyn PreferenceStore>,
    sink: Arc<dyn LogSink>,
    router: SourceRouter,
}

impl ReconciliationEngine {
    pub fn new(
        feed: Arc<dyn ChangeFeedClient>,
        prefs: Arc<dyn PreferenceStore>,
        sink: Arc<dyn LogSink>,
        router: SourceRouter,
    ) -> Self {
        Self {
            feed,
            prefs,
            sink,
            router,
        }
    }

    /// Run one cycle
    ///
    /// Callers must not run two cycles at once; see `CycleRunner`. Any error
    /// aborts the cycle without advancing the cursor, so the same batch is
    /// fetched again next time.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("cycle", %cycle_id);
        self.run(cycle_id).instrument(span).await
    }

    async fn run(&self, cycle_id: Uuid) -> Result<CycleSummary> {
        let started_at = Utc::now();

        let mut state = match EngineState::load(&*self.prefs).await {
            Ok(state) => state,
            Err(e) => {
                ActivityLog::new(self.sink.clone(), false)
                    .error(&format!("Failed to load sync state: {}", e))
                    .await;
                return Err(e);
            }
        };
        let log = ActivityLog::new(self.sink.clone(), state.settings.debugging_enabled);

        let cursor = match state.cursor.clone() {
            Some(cursor) => cursor,
            None => {
                let cursor = self.initial_cursor(&log).await?;
                log.debug("No saved change cursor, starting from now").await;
                cursor
            }
        };

        let changes = match self.feed.get_changes(&cursor).await {
            Ok(changes) => changes,
            Err(SyncError::CursorExpired(reason)) => {
                log.error(&format!(
                    "Change cursor expired ({}), restarting from now",
                    reason
                ))
                .await;
                state.cursor = Some(self.initial_cursor(&log).await?);
                self.commit(&state, &log).await?;
                return Ok(CycleSummary {
                    cycle_id,
                    events_seen: 0,
                    rewritten: 0,
                    total_steps: 0,
                    cursor_advanced: true,
                    has_more: false,
                    started_at,
                    finished_at: Utc::now(),
                });
            }
            Err(e) => {
                log.error(&format!("Failed to fetch changes: {}", e)).await;
                return Err(e);
            }
        };

        let totals = match self.apply_batch(&mut state, &changes.events, &log).await {
            Ok(totals) => totals,
            Err(e) => {
                log.error(&format!("Cycle aborted, will retry: {}", e)).await;
                // Keep corrections applied before the failure so the retry
                // sees them as duplicates; the cursor stays where it was.
                if let Err(checkpoint_err) = state.checkpoint(&*self.prefs).await {
                    log.error(&format!(
                        "Failed to save correction state: {}",
                        checkpoint_err
                    ))
                    .await;
                }
                return Err(e);
            }
        };

        state.cursor = Some(changes.next_cursor);
        self.commit(&state, &log).await?;

        if totals.rewritten == 0 {
            log.info("No new records").await;
        } else {
            log.info(&format!(
                "Found {} records, total {} steps.",
                totals.rewritten, totals.total_steps
            ))
            .await;
        }
        if changes.has_more {
            log.debug("More changes pending, continuing next cycle").await;
        }

        Ok(CycleSummary {
            cycle_id,
            events_seen: changes.events.len(),
            rewritten: totals.rewritten,
            total_steps: totals.total_steps,
            cursor_advanced: true,
            has_more: changes.has_more,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn initial_cursor(&self, log: &ActivityLog) -> Result<crate::records::Cursor> {
        match self.feed.get_initial_token(&[RecordType::Steps]).await {
            Ok(cursor) => Ok(cursor),
            Err(e) => {
                log.error(&format!("Failed to obtain change cursor: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    async fn commit(&self, state: &EngineState, log: &ActivityLog) -> Result<()> {
        if let Err(e) = state.commit(&*self.prefs).await {
            log.error(&format!("Failed to save sync state: {}", e)).await;
            return Err(e);
        }
        Ok(())
    }

    /// Apply every event in feed order; stops at the first failure
    async fn apply_batch(
        &self,
        state: &mut EngineState,
        events: &[ChangeEvent],
        log: &ActivityLog,
    ) -> Result<BatchTotals> {
        let feed = &*self.feed;
        let quirk_fix_enabled = state.settings.quirk_fix_enabled;
        let mut corrector = QuirkCorrector::new(feed, &mut state.quirk);
        let rewriter = IdempotentRewriter::new(feed, &state.settings.device);
        let mut totals = BatchTotals::default();

        for event in events {
            let record = match event {
                ChangeEvent::Upsert(record) => record,
                ChangeEvent::Delete { .. } | ChangeEvent::Other => continue,
            };

            if let Err(e) = record.validate() {
                log.error(&format!("Skipping record from {}: {}", record.source_id, e))
                    .await;
                continue;
            }

            match self.router.classify(&record.source_id, quirk_fix_enabled) {
                SourceKind::CumulativeCounter => {
                    if record.record_id.starts_with(QUIRK_SCOPE) {
                        continue;
                    }
                    let delta = corrector.apply(record).await?;
                    totals.rewritten += 1;
                    totals.total_steps += delta;
                    if delta > 0 {
                        log.debug(&format!(
                            "New record: {} steps at {} ({} cumulative)",
                            delta, record.end_time, record.count
                        ))
                        .await;
                    }
                }
                SourceKind::Retag => {
                    if rewriter.apply(record).await? {
                        totals.rewritten += 1;
                        totals.total_steps += record.count;
                        log.debug(&format!(
                            "New record: {} steps at {}",
                            record.count, record.end_time
                        ))
                        .await;
                    }
                }
                SourceKind::Unrecognized => {}
            }
        }

        Ok(totals)
    }
}
