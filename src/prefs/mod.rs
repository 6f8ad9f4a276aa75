//! Durable preferences
//!
//! A small key/value store holding everything that must survive between
//! cycles: the change cursor, the cumulative-counter correction state, the
//! device identity used for re-tagging, and feature flags.
//!
//! Values are stored as strings; typed access goes through [`EngineState`]
//! and [`Settings`], which fall back to documented defaults for absent or
//! unparsable values.

mod memory;
mod sqlite;
mod types;

pub use memory::MemoryPreferences;
pub use sqlite::SqlitePreferences;
pub use types::{DeviceIdentity, EngineState, QuirkState, Settings};

use async_trait::async_trait;

use crate::error::Result;

/// Preference keys
pub mod keys {
    pub const CHANGES_TOKEN: &str = "changes_token";
    pub const POLAR_LAST_ID: &str = "polar_last_id";
    pub const POLAR_LAST_VERSION: &str = "polar_last_version";
    pub const POLAR_LAST_STEPS: &str = "polar_last_steps";
    pub const POLAR_LAST_END_TIME: &str = "polar_last_end_time";
    pub const DEVICE_MANUFACTURER: &str = "device_manufacturer";
    pub const DEVICE_MODEL: &str = "device_model";
    pub const DEVICE_TYPE: &str = "device_type";
    pub const POLAR_QUIRK_FIX: &str = "polar_quirk_fix";
    pub const DEBUGGING_ENABLED: &str = "debugging_enabled";
}

/// Durable key/value store
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write all entries or none of them
    async fn put_all(&self, entries: &[(&str, String)]) -> Result<()>;
}
