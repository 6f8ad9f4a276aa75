//! In-memory change feed
//!
//! Mirrors the durable feed's semantics (sequence cursors, upsert keyed by
//! source and record id) and can be told to fail fetches or inserts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ChangeFeedClient, ChangesResponse, InsertOutcome};
use crate::error::{Result, SyncError};
use crate::records::{ChangeEvent, Cursor, RecordType, StepRecord};

const DEFAULT_BATCH_SIZE: usize = 1000;

/// Change feed held entirely in memory
#[derive(Clone)]
pub struct MemoryChangeFeed {
    inner: Arc<Mutex<FeedInner>>,
}

#[derive(Default)]
struct FeedInner {
    log: Vec<ChangeEvent>,
    records: HashMap<(String, String), StepRecord>,
    batch_size: usize,
    fail_fetch: bool,
    /// Insert calls allowed to succeed before failures start
    insert_budget: Option<usize>,
    insert_calls: usize,
}

impl FeedInner {
    fn upsert(&mut self, record: &StepRecord) -> bool {
        let key = (record.source_id.clone(), record.record_id.clone());
        if let Some(existing) = self.records.get(&key) {
            if existing.record_version >= record.record_version {
                return false;
            }
        }
        self.records.insert(key, record.clone());
        self.log.push(ChangeEvent::Upsert(record.clone()));
        true
    }
}

impl MemoryChangeFeed {
    pub fn new() -> Self {
        Self::with_batch_size(DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FeedInner {
                batch_size: batch_size.max(1),
                ..Default::default()
            })),
        }
    }

    /// Write a record as an external source would; returns whether it was stored
    pub async fn upsert(&self, record: StepRecord) -> bool {
        self.inner.lock().await.upsert(&record)
    }

    /// Append a raw event without touching the stored records
    ///
    /// Used to simulate redelivery and out-of-order delivery.
    pub async fn push_event(&self, event: ChangeEvent) {
        self.inner.lock().await.log.push(event);
    }

    /// Records currently stored, in no particular order
    pub async fn records(&self) -> Vec<StepRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    /// Stored record by source and id
    pub async fn get(&self, source_id: &str, record_id: &str) -> Option<StepRecord> {
        self.inner
            .lock()
            .await
            .records
            .get(&(source_id.to_string(), record_id.to_string()))
            .cloned()
    }

    /// Number of insert calls received, including failed ones
    pub async fn insert_calls(&self) -> usize {
        self.inner.lock().await.insert_calls
    }

    pub async fn set_fetch_failure(&self, fail: bool) {
        self.inner.lock().await.fail_fetch = fail;
    }

    /// Let `successes` more insert calls through, then fail every insert
    pub async fn fail_inserts_after(&self, successes: usize) {
        self.inner.lock().await.insert_budget = Some(successes);
    }

    pub async fn clear_failures(&self) {
        let mut inner = self.inner.lock().await;
        inner.fail_fetch = false;
        inner.insert_budget = None;
    }
}

impl Default for MemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_position(cursor: &Cursor, log_len: usize) -> Result<usize> {
    let position: usize = cursor
        .as_str()
        .parse()
        .map_err(|_| SyncError::CursorExpired(format!("unrecognised cursor '{}'", cursor)))?;
    if position > log_len {
        return Err(SyncError::CursorExpired(format!(
            "cursor {} is past the end of the feed",
            cursor
        )));
    }
    Ok(position)
}

#[async_trait]
impl ChangeFeedClient for MemoryChangeFeed {
    async fn get_initial_token(&self, _record_types: &[RecordType]) -> Result<Cursor> {
        let inner = self.inner.lock().await;
        if inner.fail_fetch {
            return Err(SyncError::FeedUnavailable("injected fetch failure".to_string()));
        }
        Ok(Cursor::new(inner.log.len().to_string()))
    }

    async fn get_changes(&self, cursor: &Cursor) -> Result<ChangesResponse> {
        let inner = self.inner.lock().await;
        if inner.fail_fetch {
            return Err(SyncError::FeedUnavailable("injected fetch failure".to_string()));
        }

        let start = parse_position(cursor, inner.log.len())?;
        let end = (start + inner.batch_size).min(inner.log.len());

        Ok(ChangesResponse {
            events: inner.log[start..end].to_vec(),
            next_cursor: Cursor::new(end.to_string()),
            has_more: end < inner.log.len(),
        })
    }

    async fn insert(&self, records: &[StepRecord]) -> Result<InsertOutcome> {
        let mut inner = self.inner.lock().await;
        inner.insert_calls += 1;

        if let Some(budget) = inner.insert_budget {
            if budget == 0 {
                let record_id = records
                    .first()
                    .map(|r| r.record_id.as_str())
                    .unwrap_or_default();
                return Err(SyncError::write_failure(record_id, "injected insert failure"));
            }
            inner.insert_budget = Some(budget - 1);
        }

        for record in records {
            record.validate()?;
        }

        let mut outcome = InsertOutcome::default();
        for record in records {
            if inner.upsert(record) {
                outcome.inserted += 1;
            } else {
                outcome.already_present += 1;
            }
        }
        Ok(outcome)
    }
}
