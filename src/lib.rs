//! Step Rewriter
//!
//! Consumes a resumable change feed of step-count records and writes
//! corrected, derived records back to the same store: records from one
//! source are re-tagged with a configured device identity, and cumulative
//! revisions from another are converted into per-revision increments.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod log_sink;
pub mod prefs;
pub mod reconcile;
pub mod records;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use error::{Result, SyncError};
