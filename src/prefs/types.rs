//! Typed views over the preference store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{keys, PreferenceStore};
use crate::error::Result;
use crate::records::{Cursor, DeviceClass, DeviceDescriptor};

/// Last applied revision of the cumulative-counter source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuirkState {
    pub last_record_id: String,
    pub last_record_version: i64,
    pub last_cumulative_count: u64,
    pub last_end_time: DateTime<Utc>,
}

impl Default for QuirkState {
    fn default() -> Self {
        Self {
            last_record_id: String::new(),
            last_record_version: 0,
            last_cumulative_count: 0,
            last_end_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl QuirkState {
    async fn load(store: &dyn PreferenceStore) -> Result<Self> {
        let defaults = QuirkState::default();
        let last_end_millis = parse_or(
            keys::POLAR_LAST_END_TIME,
            store.get(keys::POLAR_LAST_END_TIME).await?,
            0i64,
        );

        Ok(Self {
            last_record_id: store
                .get(keys::POLAR_LAST_ID)
                .await?
                .unwrap_or(defaults.last_record_id),
            last_record_version: parse_or(
                keys::POLAR_LAST_VERSION,
                store.get(keys::POLAR_LAST_VERSION).await?,
                defaults.last_record_version,
            ),
            last_cumulative_count: parse_or(
                keys::POLAR_LAST_STEPS,
                store.get(keys::POLAR_LAST_STEPS).await?,
                defaults.last_cumulative_count,
            ),
            last_end_time: DateTime::from_timestamp_millis(last_end_millis)
                .unwrap_or(defaults.last_end_time),
        })
    }

    fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            (keys::POLAR_LAST_ID, self.last_record_id.clone()),
            (keys::POLAR_LAST_VERSION, self.last_record_version.to_string()),
            (keys::POLAR_LAST_STEPS, self.last_cumulative_count.to_string()),
            (
                keys::POLAR_LAST_END_TIME,
                self.last_end_time.timestamp_millis().to_string(),
            ),
        ]
    }
}

/// Device metadata stamped onto re-tagged records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub model: String,
    #[serde(rename = "type")]
    pub class: DeviceClass,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            manufacturer: "OnePlus".to_string(),
            model: "OnePlus Watch 3".to_string(),
            class: DeviceClass::Watch,
        }
    }
}

impl DeviceIdentity {
    pub fn descriptor(&self) -> DeviceDescriptor {
        DeviceDescriptor {
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            class: self.class,
        }
    }
}

/// Values owned by the settings surface
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Settings {
    pub device: DeviceIdentity,
    /// Apply cumulative-counter correction
    #[serde(rename = "quirkFixEnabled")]
    pub quirk_fix_enabled: bool,
    /// Emit debug-level lines to the activity log
    #[serde(rename = "debuggingEnabled")]
    pub debugging_enabled: bool,
}

impl Settings {
    pub async fn load(store: &dyn PreferenceStore) -> Result<Self> {
        let defaults = DeviceIdentity::default();
        let class = store
            .get(keys::DEVICE_TYPE)
            .await?
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(DeviceClass::from_ordinal)
            .unwrap_or(defaults.class);

        Ok(Self {
            device: DeviceIdentity {
                manufacturer: store
                    .get(keys::DEVICE_MANUFACTURER)
                    .await?
                    .unwrap_or(defaults.manufacturer),
                model: store
                    .get(keys::DEVICE_MODEL)
                    .await?
                    .unwrap_or(defaults.model),
                class,
            },
            quirk_fix_enabled: parse_or(
                keys::POLAR_QUIRK_FIX,
                store.get(keys::POLAR_QUIRK_FIX).await?,
                false,
            ),
            debugging_enabled: parse_or(
                keys::DEBUGGING_ENABLED,
                store.get(keys::DEBUGGING_ENABLED).await?,
                false,
            ),
        })
    }

    pub async fn save(&self, store: &dyn PreferenceStore) -> Result<()> {
        store
            .put_all(&[
                (keys::DEVICE_MANUFACTURER, self.device.manufacturer.clone()),
                (keys::DEVICE_MODEL, self.device.model.clone()),
                (keys::DEVICE_TYPE, self.device.class.ordinal().to_string()),
                (keys::POLAR_QUIRK_FIX, self.quirk_fix_enabled.to_string()),
                (keys::DEBUGGING_ENABLED, self.debugging_enabled.to_string()),
            ])
            .await
    }
}

/// Everything a cycle reads from the preference store
///
/// Loaded once at cycle start and written back at cycle end, so a cycle
/// never leaves a half-updated cursor behind.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub cursor: Option<Cursor>,
    pub quirk: QuirkState,
    pub settings: Settings,
}

impl EngineState {
    pub async fn load(store: &dyn PreferenceStore) -> Result<Self> {
        let cursor = store
            .get(keys::CHANGES_TOKEN)
            .await?
            .filter(|token| !token.is_empty())
            .map(Cursor::new);

        Ok(Self {
            cursor,
            quirk: QuirkState::load(store).await?,
            settings: Settings::load(store).await?,
        })
    }

    /// Persist the cursor together with the correction state
    pub async fn commit(&self, store: &dyn PreferenceStore) -> Result<()> {
        let mut entries = self.quirk.entries();
        if let Some(cursor) = &self.cursor {
            entries.push((keys::CHANGES_TOKEN, cursor.as_str().to_string()));
        }
        store.put_all(&entries).await
    }

    /// Persist the correction state alone, leaving the stored cursor untouched
    pub async fn checkpoint(&self, store: &dyn PreferenceStore) -> Result<()> {
        store.put_all(&self.quirk.entries()).await
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        Some(value) => value.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %value, "Unparsable preference, using default");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryPreferences;

    #[tokio::test]
    async fn test_empty_store_yields_defaults() {
        let store = MemoryPreferences::new();
        let state = EngineState::load(&store).await.unwrap();

        assert!(state.cursor.is_none());
        assert_eq!(state.quirk, QuirkState::default());
        assert_eq!(state.settings.device, DeviceIdentity::default());
        assert!(!state.settings.quirk_fix_enabled);
        assert!(!state.settings.debugging_enabled);
    }

    #[tokio::test]
    async fn test_commit_round_trips_cursor_and_quirk() {
        let store = MemoryPreferences::new();
        let mut state = EngineState::load(&store).await.unwrap();
        state.cursor = Some(Cursor::new("17"));
        state.quirk = QuirkState {
            last_record_id: "R1".to_string(),
            last_record_version: 3,
            last_cumulative_count: 300,
            last_end_time: DateTime::from_timestamp_millis(1_700_000_120_000).unwrap(),
        };
        state.commit(&store).await.unwrap();

        assert_eq!(store.raw(keys::CHANGES_TOKEN).await.as_deref(), Some("17"));
        assert_eq!(store.raw(keys::POLAR_LAST_STEPS).await.as_deref(), Some("300"));
        assert_eq!(
            store.raw(keys::POLAR_LAST_END_TIME).await.as_deref(),
            Some("1700000120000")
        );

        let reloaded = EngineState::load(&store).await.unwrap();
        assert_eq!(reloaded.cursor, state.cursor);
        assert_eq!(reloaded.quirk, state.quirk);
    }

    #[tokio::test]
    async fn test_checkpoint_leaves_cursor_alone() {
        let store = MemoryPreferences::new();
        store
            .put_all(&[(keys::CHANGES_TOKEN, "5".to_string())])
            .await
            .unwrap();

        let mut state = EngineState::load(&store).await.unwrap();
        state.cursor = Some(Cursor::new("9"));
        state.quirk.last_record_id = "R1".to_string();
        state.checkpoint(&store).await.unwrap();

        let reloaded = EngineState::load(&store).await.unwrap();
        assert_eq!(reloaded.cursor, Some(Cursor::new("5")));
        assert_eq!(reloaded.quirk.last_record_id, "R1");
    }

    #[tokio::test]
    async fn test_settings_fall_back_on_bad_values() {
        let store = MemoryPreferences::new();
        store
            .put_all(&[
                (keys::DEVICE_MODEL, "Pixel Watch".to_string()),
                (keys::DEVICE_TYPE, "seven".to_string()),
                (keys::POLAR_QUIRK_FIX, "true".to_string()),
                (keys::DEBUGGING_ENABLED, "yes".to_string()),
            ])
            .await
            .unwrap();

        let settings = Settings::load(&store).await.unwrap();
        assert_eq!(settings.device.manufacturer, "OnePlus");
        assert_eq!(settings.device.model, "Pixel Watch");
        assert_eq!(settings.device.class, DeviceClass::Watch);
        assert!(settings.quirk_fix_enabled);
        assert!(!settings.debugging_enabled);
    }

    #[tokio::test]
    async fn test_settings_save_uses_ordinals() {
        let store = MemoryPreferences::new();
        let settings = Settings {
            device: DeviceIdentity {
                manufacturer: "Garmin".to_string(),
                model: "Forerunner".to_string(),
                class: DeviceClass::Ring,
            },
            quirk_fix_enabled: true,
            debugging_enabled: true,
        };
        settings.save(&store).await.unwrap();

        assert_eq!(store.raw(keys::DEVICE_TYPE).await.as_deref(), Some("4"));
        assert_eq!(Settings::load(&store).await.unwrap(), settings);
    }
}
