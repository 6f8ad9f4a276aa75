//! Change feed access
//!
//! The feed is an append-only log of record upserts and deletes consumed
//! through an opaque cursor. Two implementations are provided:
//! - `SqliteChangeFeed`: durable store backing the binary
//! - `MemoryChangeFeed`: in-process feed with failure injection for tests

mod memory;
mod sqlite;

pub use memory::MemoryChangeFeed;
pub use sqlite::SqliteChangeFeed;

use async_trait::async_trait;

use crate::error::Result;
use crate::records::{ChangeEvent, Cursor, RecordType, StepRecord};

/// One batch of changes following a cursor
#[derive(Debug, Clone)]
pub struct ChangesResponse {
    /// Events in feed order
    pub events: Vec<ChangeEvent>,
    /// Cursor positioned after the last returned event
    pub next_cursor: Cursor,
    /// Whether more events were pending beyond this batch
    pub has_more: bool,
}

/// Result of an insert call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Records newly written to the store
    pub inserted: usize,
    /// Records whose id already existed at the same or a newer version
    pub already_present: usize,
}

impl InsertOutcome {
    pub fn wrote_any(&self) -> bool {
        self.inserted > 0
    }
}

/// Client for the external change feed
#[async_trait]
pub trait ChangeFeedClient: Send + Sync {
    /// Cursor positioned at the current end of the feed (no backfill)
    async fn get_initial_token(&self, record_types: &[RecordType]) -> Result<Cursor>;

    /// Fetch the batch of changes following `cursor`
    async fn get_changes(&self, cursor: &Cursor) -> Result<ChangesResponse>;

    /// Insert records; the whole call fails or succeeds
    async fn insert(&self, records: &[StepRecord]) -> Result<InsertOutcome>;
}
