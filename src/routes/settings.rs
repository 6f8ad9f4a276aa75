//! Settings API routes
//!
//! Device identity used for re-tagging and the feature flags read by the
//! engine at the start of each cycle.

use axum::{extract::State, routing::get, Json, Router};
use serde::Deserialize;

use crate::error::{Result, SyncError};
use crate::prefs::{DeviceIdentity, Settings};
use crate::records::DeviceClass;
use crate::state::AppState;

/// Create the settings router
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_settings).put(update_settings))
}

/// Partial settings update; absent fields keep their stored value
#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "type")]
    pub class: Option<DeviceClass>,
    #[serde(rename = "quirkFixEnabled")]
    pub quirk_fix_enabled: Option<bool>,
    #[serde(rename = "debuggingEnabled")]
    pub debugging_enabled: Option<bool>,
}

impl SettingsUpdate {
    fn apply(self, current: Settings) -> Result<Settings> {
        let device = DeviceIdentity {
            manufacturer: non_empty("manufacturer", self.manufacturer)?
                .unwrap_or(current.device.manufacturer),
            model: non_empty("model", self.model)?.unwrap_or(current.device.model),
            class: self.class.unwrap_or(current.device.class),
        };

        Ok(Settings {
            device,
            quirk_fix_enabled: self.quirk_fix_enabled.unwrap_or(current.quirk_fix_enabled),
            debugging_enabled: self.debugging_enabled.unwrap_or(current.debugging_enabled),
        })
    }
}

fn non_empty(field: &str, value: Option<String>) -> Result<Option<String>> {
    match value {
        Some(v) if v.trim().is_empty() => Err(SyncError::InvalidSettings(format!(
            "{} must not be empty",
            field
        ))),
        Some(v) => Ok(Some(v.trim().to_string())),
        None => Ok(None),
    }
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<Settings>> {
    let settings = Settings::load(state.prefs()).await?;
    Ok(Json(settings))
}

/// Update settings; takes effect from the next cycle
async fn update_settings(
    State(state): State<AppState>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<Settings>> {
    let current = Settings::load(state.prefs()).await?;
    let settings = update.apply(current)?;
    settings.save(state.prefs()).await?;

    tracing::info!(
        manufacturer = %settings.device.manufacturer,
        model = %settings.device.model,
        quirk_fix_enabled = settings.quirk_fix_enabled,
        debugging_enabled = settings.debugging_enabled,
        "Settings updated"
    );

    Ok(Json(settings))
}
