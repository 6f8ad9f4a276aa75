//! Step record data types
//!
//! Defines the values carried by the change feed:
//! - Step records with revision tracking
//! - Device descriptors
//! - Change events and cursors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SyncError};

/// Record types a change cursor can be scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Steps,
}

/// Class of device that produced a record
///
/// Ordinals match the health platform's device type constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Unknown,
    Watch,
    Phone,
    Scale,
    Ring,
    HeadMounted,
    FitnessBand,
    ChestStrap,
    SmartDisplay,
}

impl DeviceClass {
    pub fn ordinal(self) -> i64 {
        match self {
            DeviceClass::Unknown => 0,
            DeviceClass::Watch => 1,
            DeviceClass::Phone => 2,
            DeviceClass::Scale => 3,
            DeviceClass::Ring => 4,
            DeviceClass::HeadMounted => 5,
            DeviceClass::FitnessBand => 6,
            DeviceClass::ChestStrap => 7,
            DeviceClass::SmartDisplay => 8,
        }
    }

    /// Unrecognised ordinals decode as `Unknown`
    pub fn from_ordinal(ordinal: i64) -> Self {
        match ordinal {
            1 => DeviceClass::Watch,
            2 => DeviceClass::Phone,
            3 => DeviceClass::Scale,
            4 => DeviceClass::Ring,
            5 => DeviceClass::HeadMounted,
            6 => DeviceClass::FitnessBand,
            7 => DeviceClass::ChestStrap,
            8 => DeviceClass::SmartDisplay,
            _ => DeviceClass::Unknown,
        }
    }
}

/// Device metadata attached to a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub manufacturer: String,
    pub model: String,
    #[serde(rename = "type")]
    pub class: DeviceClass,
}

impl DeviceDescriptor {
    pub fn unknown() -> Self {
        Self {
            manufacturer: String::new(),
            model: String::new(),
            class: DeviceClass::Unknown,
        }
    }
}

/// A step count over a time range
///
/// `count` is a delta or a running total depending on the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub count: u64,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    /// Package or application that originated the record
    #[serde(rename = "sourceId")]
    pub source_id: String,
    /// Stable across revisions of the same logical record
    #[serde(rename = "recordId")]
    pub record_id: String,
    #[serde(rename = "recordVersion")]
    pub record_version: i64,
    pub device: DeviceDescriptor,
}

impl StepRecord {
    /// Check the time range and identity fields
    pub fn validate(&self) -> Result<()> {
        if self.end_time < self.start_time {
            return Err(SyncError::InvalidRecord(format!(
                "record {} ends before it starts ({} < {})",
                self.record_id, self.end_time, self.start_time
            )));
        }
        if self.record_id.is_empty() {
            return Err(SyncError::InvalidRecord(
                "record has an empty record id".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy of this record with a new identity and count, used for derived records
    pub fn derive(
        &self,
        record_id: String,
        count: u64,
        start_time: DateTime<Utc>,
        device: DeviceDescriptor,
    ) -> StepRecord {
        StepRecord {
            count,
            start_time,
            end_time: self.end_time,
            source_id: self.source_id.clone(),
            record_id,
            record_version: 1,
            device,
        }
    }
}

/// A single entry of the change feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChangeEvent {
    Upsert(StepRecord),
    Delete { record_id: String },
    /// Any change this system does not interpret
    Other,
}

/// Opaque resumable position in the change feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(start: DateTime<Utc>, end: DateTime<Utc>) -> StepRecord {
        StepRecord {
            count: 10,
            start_time: start,
            end_time: end,
            source_id: "fi.polar.polarflow".to_string(),
            record_id: "r-1".to_string(),
            record_version: 3,
            device: DeviceDescriptor::unknown(),
        }
    }

    #[test]
    fn test_validate_rejects_inverted_range() {
        let now = Utc::now();
        assert!(record(now, now).validate().is_ok());
        assert!(record(now, now - Duration::seconds(1)).validate().is_err());
    }

    #[test]
    fn test_derive_resets_version_and_keeps_origin() {
        let now = Utc::now();
        let original = record(now - Duration::minutes(5), now);
        let device = DeviceDescriptor {
            manufacturer: "OnePlus".to_string(),
            model: "OnePlus Watch 3".to_string(),
            class: DeviceClass::Watch,
        };

        let derived = original.derive("x_r-1".to_string(), 4, now - Duration::minutes(1), device.clone());
        assert_eq!(derived.record_version, 1);
        assert_eq!(derived.source_id, original.source_id);
        assert_eq!(derived.end_time, original.end_time);
        assert_eq!(derived.count, 4);
        assert_eq!(derived.device, device);
    }

    #[test]
    fn test_device_class_ordinals() {
        assert_eq!(DeviceClass::Watch.ordinal(), 1);
        assert_eq!(DeviceClass::from_ordinal(7), DeviceClass::ChestStrap);
        assert_eq!(DeviceClass::from_ordinal(42), DeviceClass::Unknown);
    }

    #[test]
    fn test_change_event_serialization() {
        let json = serde_json::to_string(&ChangeEvent::Delete {
            record_id: "r-9".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"kind\":\"delete\""));
    }
}
