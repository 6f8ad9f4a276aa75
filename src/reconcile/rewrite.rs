//! Device re-tagging
//!
//! Records from the re-tag source are re-emitted as sibling records that
//! carry the configured device identity. The original is never modified.

use crate::error::Result;
use crate::feed::ChangeFeedClient;
use crate::prefs::DeviceIdentity;
use crate::records::StepRecord;

/// Prefix carried by every record this rewriter emits
pub const REWRITE_MARKER: &str = "rewritten_";

pub struct IdempotentRewriter<'a> {
    feed: &'a dyn ChangeFeedClient,
    identity: &'a DeviceIdentity,
}

impl<'a> IdempotentRewriter<'a> {
    pub fn new(feed: &'a dyn ChangeFeedClient, identity: &'a DeviceIdentity) -> Self {
        Self { feed, identity }
    }

    /// Id of the record derived from `record_id`
    pub fn derived_id(record_id: &str) -> String {
        format!("{}{}", REWRITE_MARKER, record_id)
    }

    pub fn is_derived(record_id: &str) -> bool {
        record_id.starts_with(REWRITE_MARKER)
    }

    /// Emit the re-tagged sibling of `record`; returns whether a write happened
    pub async fn apply(&self, record: &StepRecord) -> Result<bool> {
        if Self::is_derived(&record.record_id) {
            return Ok(false);
        }

        let derived = record.derive(
            Self::derived_id(&record.record_id),
            record.count,
            record.start_time,
            self.identity.descriptor(),
        );

        let outcome = self.feed.insert(std::slice::from_ref(&derived)).await?;
        if !outcome.wrote_any() {
            tracing::debug!(
                record_id = %record.record_id,
                derived_id = %derived.record_id,
                "Re-tagged record already present"
            );
            return Ok(false);
        }

        Ok(true)
    }
}
