//! Step record reconciliation
//!
//! The engine walks the change feed and hands each step upsert to the
//! correction for its source:
//!
//! - [`QuirkCorrector`] turns cumulative revisions into increments
//! - [`IdempotentRewriter`] re-emits records under the configured device
//!
//! Both write derived records back through the same feed, marked by an id
//! prefix so they are recognised when they come around again.

pub mod engine;
pub mod quirk;
pub mod rewrite;
pub mod source;

pub use engine::{CycleSummary, ReconciliationEngine};
pub use quirk::{Classification, QuirkCorrector, QUIRK_SCOPE};
pub use rewrite::{IdempotentRewriter, REWRITE_MARKER};
pub use source::{SourceKind, SourceRouter};
