//! Cumulative counter correction
//!
//! Some sources keep revising a single record for an ongoing session, and
//! each revision reports the running total rather than the steps added since
//! the previous revision. Downstream consumers expect increments, so every
//! applied revision is turned into a derived record holding only the delta.
//!
//! # State machine
//!
//! The last applied revision is remembered in [`QuirkState`]:
//!
//! - same id, same version: duplicate, nothing happens
//! - same id, older version: stale redelivery, nothing happens
//! - different id: new session, the whole count is new
//! - same id, newer version: revision, only the growth is new
//!
//! A revision whose count went down is treated as a counter reset and its
//! full count is taken as the delta. New records and revisions always emit a
//! derived record, including ones that add nothing.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::feed::ChangeFeedClient;
use crate::prefs::QuirkState;
use crate::records::StepRecord;

/// Prefix carried by every record this corrector emits
pub const QUIRK_SCOPE: &str = "polar_";

/// Where an incoming record sits relative to the last applied revision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Emitted by this corrector in an earlier cycle
    OwnOutput,
    Duplicate,
    Stale,
    NewRecord,
    Revision,
}

pub fn classify(state: &QuirkState, record: &StepRecord) -> Classification {
    if record.record_id.starts_with(QUIRK_SCOPE) {
        return Classification::OwnOutput;
    }
    if record.record_id != state.last_record_id {
        return Classification::NewRecord;
    }
    match record.record_version.cmp(&state.last_record_version) {
        std::cmp::Ordering::Equal => Classification::Duplicate,
        std::cmp::Ordering::Less => Classification::Stale,
        std::cmp::Ordering::Greater => Classification::Revision,
    }
}

/// Id of the record derived from the revision following `state`
///
/// Versions only move forward within a record, so the prior version keeps
/// ids distinct even when a reset brings back an earlier count.
fn revision_id(state: &QuirkState, record_id: &str) -> String {
    format!(
        "{}{}_{}_{}",
        QUIRK_SCOPE, record_id, state.last_record_version, state.last_cumulative_count
    )
}

pub struct QuirkCorrector<'a> {
    feed: &'a dyn ChangeFeedClient,
    state: &'a mut QuirkState,
}

impl<'a> QuirkCorrector<'a> {
    pub fn new(feed: &'a dyn ChangeFeedClient, state: &'a mut QuirkState) -> Self {
        Self { feed, state }
    }

    pub fn state(&self) -> &QuirkState {
        &*self.state
    }

    /// Apply one revision and return the number of new steps it contributed
    ///
    /// The state only advances once the derived record has been written; a
    /// failed insert leaves it untouched so the revision is retried verbatim.
    pub async fn apply(&mut self, record: &StepRecord) -> Result<u64> {
        let (mut delta, start_time, derived_id) = match classify(&*self.state, record) {
            Classification::OwnOutput | Classification::Duplicate => return Ok(0),
            Classification::Stale => {
                tracing::debug!(
                    record_id = %record.record_id,
                    version = record.record_version,
                    applied_version = self.state.last_record_version,
                    "Ignoring stale revision"
                );
                return Ok(0);
            }
            Classification::NewRecord => (
                record.count,
                record.start_time,
                format!("{}{}", QUIRK_SCOPE, record.record_id),
            ),
            Classification::Revision => (
                self.revision_delta(record),
                self.revision_start(record),
                revision_id(&*self.state, &record.record_id),
            ),
        };

        let derived = record.derive(derived_id, delta, start_time, record.device.clone());
        let outcome = self.feed.insert(std::slice::from_ref(&derived)).await?;
        if !outcome.wrote_any() {
            tracing::debug!(
                derived_id = %derived.record_id,
                "Corrected record already present"
            );
            delta = 0;
        }

        *self.state = QuirkState {
            last_record_id: record.record_id.clone(),
            last_record_version: record.record_version,
            last_cumulative_count: record.count,
            last_end_time: record.end_time,
        };

        Ok(delta)
    }

    fn revision_delta(&self, record: &StepRecord) -> u64 {
        match record.count.checked_sub(self.state.last_cumulative_count) {
            Some(delta) => delta,
            None => {
                tracing::warn!(
                    record_id = %record.record_id,
                    previous = self.state.last_cumulative_count,
                    current = record.count,
                    "Cumulative count went down, treating as a counter reset"
                );
                record.count
            }
        }
    }

    // The derived record covers only the part of the session added since the
    // last applied revision.
    fn revision_start(&self, record: &StepRecord) -> DateTime<Utc> {
        if self.state.last_end_time <= record.end_time {
            self.state.last_end_time
        } else {
            record.start_time
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::feed::MemoryChangeFeed;
    use crate::records::DeviceDescriptor;
    use chrono::Duration;

    const SOURCE: &str = "fi.polar.polarflow";

    fn base_time() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn record(id: &str, count: u64, version: i64, start_secs: i64, end_secs: i64) -> StepRecord {
        StepRecord {
            count,
            start_time: base_time() + Duration::seconds(start_secs),
            end_time: base_time() + Duration::seconds(end_secs),
            source_id: SOURCE.to_string(),
            record_id: id.to_string(),
            record_version: version,
            device: DeviceDescriptor::unknown(),
        }
    }

    fn snapshot(state: &QuirkState) -> (String, i64, u64, i64) {
        (
            state.last_record_id.clone(),
            state.last_record_version,
            state.last_cumulative_count,
            (state.last_end_time - base_time()).num_seconds(),
        )
    }

    #[tokio::test]
    async fn test_cumulative_session_scenario() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        let delta = corrector.apply(&record("test_id", 100, 1, 0, 60)).await.unwrap();
        assert_eq!(delta, 100);
        assert_eq!(snapshot(corrector.state()), ("test_id".to_string(), 1, 100, 60));

        let delta = corrector.apply(&record("test_id", 250, 2, 0, 70)).await.unwrap();
        assert_eq!(delta, 150);
        assert_eq!(snapshot(corrector.state()), ("test_id".to_string(), 2, 250, 70));

        let delta = corrector.apply(&record("test_id", 300, 3, 0, 120)).await.unwrap();
        assert_eq!(delta, 50);
        assert_eq!(snapshot(corrector.state()), ("test_id".to_string(), 3, 300, 120));

        // Identical redelivery changes nothing
        let delta = corrector.apply(&record("test_id", 300, 3, 0, 120)).await.unwrap();
        assert_eq!(delta, 0);
        assert_eq!(snapshot(corrector.state()), ("test_id".to_string(), 3, 300, 120));

        let delta = corrector
            .apply(&record("test_id2", 100, 1, 3600, 3660))
            .await
            .unwrap();
        assert_eq!(delta, 100);
        assert_eq!(snapshot(corrector.state()), ("test_id2".to_string(), 1, 100, 3660));

        assert_eq!(feed.insert_calls().await, 4);
    }

    #[tokio::test]
    async fn test_derived_records_cover_new_portion_only() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        corrector.apply(&record("R1", 100, 1, 0, 60)).await.unwrap();
        corrector.apply(&record("R1", 250, 2, 0, 70)).await.unwrap();

        let first = feed.get(SOURCE, "polar_R1").await.unwrap();
        assert_eq!(first.count, 100);
        assert_eq!(first.start_time, base_time());
        assert_eq!(first.record_version, 1);

        let second = feed.get(SOURCE, "polar_R1_1_100").await.unwrap();
        assert_eq!(second.count, 150);
        assert_eq!(second.start_time, base_time() + Duration::seconds(60));
        assert_eq!(second.end_time, base_time() + Duration::seconds(70));
    }

    #[tokio::test]
    async fn test_stale_revision_is_ignored() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        corrector.apply(&record("R1", 100, 1, 0, 60)).await.unwrap();
        corrector.apply(&record("R1", 250, 2, 0, 70)).await.unwrap();
        let before = corrector.state().clone();

        let delta = corrector.apply(&record("R1", 100, 1, 0, 60)).await.unwrap();
        assert_eq!(delta, 0);
        assert_eq!(corrector.state(), &before);
    }

    #[tokio::test]
    async fn test_counter_reset_takes_full_count() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        corrector.apply(&record("R1", 500, 1, 0, 60)).await.unwrap();
        let delta = corrector.apply(&record("R1", 80, 2, 0, 90)).await.unwrap();

        assert_eq!(delta, 80);
        assert_eq!(corrector.state().last_cumulative_count, 80);
        assert_eq!(feed.get(SOURCE, "polar_R1_1_500").await.unwrap().count, 80);
    }

    #[tokio::test]
    async fn test_growth_after_reset_gets_fresh_id() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        let mut deltas = Vec::new();
        for (count, version, end) in [(100, 1, 60), (250, 2, 70), (100, 3, 80), (250, 4, 90)] {
            deltas.push(corrector.apply(&record("R1", count, version, 0, end)).await.unwrap());
        }

        assert_eq!(deltas, vec![100, 150, 100, 150]);
        assert_eq!(feed.get(SOURCE, "polar_R1_1_100").await.unwrap().count, 150);
        assert_eq!(feed.get(SOURCE, "polar_R1_3_100").await.unwrap().count, 150);
        assert_eq!(feed.records().await.len(), 4);
    }

    #[tokio::test]
    async fn test_zero_growth_still_emits_record() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        corrector.apply(&record("R1", 100, 1, 0, 60)).await.unwrap();
        let delta = corrector.apply(&record("R1", 100, 2, 0, 90)).await.unwrap();

        assert_eq!(delta, 0);
        assert_eq!(corrector.state().last_record_version, 2);
        assert_eq!(feed.get(SOURCE, "polar_R1_1_100").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_empty_new_record_still_emits_record() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        let delta = corrector.apply(&record("R9", 0, 1, 0, 60)).await.unwrap();

        assert_eq!(delta, 0);
        assert_eq!(feed.insert_calls().await, 1);
        assert_eq!(feed.get(SOURCE, "polar_R9").await.unwrap().count, 0);
        assert_eq!(corrector.state().last_record_id, "R9");
    }

    #[tokio::test]
    async fn test_failed_insert_keeps_state() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        corrector.apply(&record("R1", 100, 1, 0, 60)).await.unwrap();
        let before = corrector.state().clone();

        feed.fail_inserts_after(0).await;
        let result = corrector.apply(&record("R1", 250, 2, 0, 70)).await;
        assert!(matches!(result, Err(SyncError::WriteFailure { .. })));
        assert_eq!(corrector.state(), &before);

        // Retried verbatim once the store recovers
        feed.clear_failures().await;
        let delta = corrector.apply(&record("R1", 250, 2, 0, 70)).await.unwrap();
        assert_eq!(delta, 150);
    }

    #[tokio::test]
    async fn test_own_output_is_not_corrected_again() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        let delta = corrector
            .apply(&record("polar_R1_1_100", 150, 1, 60, 70))
            .await
            .unwrap();
        assert_eq!(delta, 0);
        assert_eq!(corrector.state(), &QuirkState::default());
    }

    #[tokio::test]
    async fn test_end_time_before_last_end_uses_own_start() {
        let feed = MemoryChangeFeed::new();
        let mut state = QuirkState::default();
        let mut corrector = QuirkCorrector::new(&feed, &mut state);

        corrector.apply(&record("R1", 100, 1, 0, 120)).await.unwrap();
        corrector.apply(&record("R1", 160, 2, 10, 90)).await.unwrap();

        let derived = feed.get(SOURCE, "polar_R1_1_100").await.unwrap();
        assert_eq!(derived.start_time, base_time() + Duration::seconds(10));
        assert!(derived.validate().is_ok());
    }

    #[test]
    fn test_classification() {
        let state = QuirkState {
            last_record_id: "R1".to_string(),
            last_record_version: 3,
            last_cumulative_count: 300,
            last_end_time: base_time(),
        };

        assert_eq!(classify(&state, &record("R1", 300, 3, 0, 1)), Classification::Duplicate);
        assert_eq!(classify(&state, &record("R1", 200, 2, 0, 1)), Classification::Stale);
        assert_eq!(classify(&state, &record("R1", 400, 4, 0, 1)), Classification::Revision);
        assert_eq!(classify(&state, &record("R2", 10, 1, 0, 1)), Classification::NewRecord);
        assert_eq!(classify(&state, &record("polar_R2", 10, 1, 0, 1)), Classification::OwnOutput);
    }
}
