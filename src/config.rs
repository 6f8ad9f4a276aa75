//! Configuration management for the step rewriter

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RETAG_SOURCE: &str = "com.heytap.health.international";
pub const DEFAULT_CUMULATIVE_SOURCE: &str = "fi.polar.polarflow";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
    pub activity_log: ActivityLogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Seconds between periodic cycles
    pub interval_secs: u64,
    /// Maximum number of change events fetched per cycle
    pub batch_size: u32,
    /// Source whose records are re-tagged with the configured device
    pub retag_source: String,
    /// Source reporting cumulative step totals instead of increments
    pub cumulative_source: String,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivityLogConfig {
    pub path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig {
                url: "sqlite:./steps.db".to_string(),
            },
            sync: SyncConfig {
                interval_secs: 900,
                batch_size: 1000,
                retag_source: DEFAULT_RETAG_SOURCE.to_string(),
                cumulative_source: DEFAULT_CUMULATIVE_SOURCE.to_string(),
            },
            activity_log: ActivityLogConfig {
                path: PathBuf::from("./activity.log"),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        Self::from_lookup(|key| env::var(key))
    }

    /// Build a config from an arbitrary variable lookup.
    ///
    /// Missing or unparsable values fall back to the defaults; only
    /// non-unicode values are reported as errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, env::VarError>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let defaults = Config::default();
        let var = |key: &str| -> Result<Option<String>, env::VarError> {
            match lookup(key) {
                Ok(value) => Ok(Some(value)),
                Err(env::VarError::NotPresent) => Ok(None),
                Err(e) => Err(e),
            }
        };

        Ok(Config {
            server: ServerConfig {
                host: var("SERVER_HOST")?.unwrap_or(defaults.server.host),
                port: var("SERVER_PORT")?
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(defaults.server.port),
            },
            database: DatabaseConfig {
                url: var("DATABASE_URL")?.unwrap_or(defaults.database.url),
            },
            sync: SyncConfig {
                interval_secs: var("SYNC_INTERVAL_SECS")?
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(defaults.sync.interval_secs),
                batch_size: var("SYNC_BATCH_SIZE")?
                    .and_then(|v| v.parse().ok())
                    .filter(|size| *size > 0)
                    .unwrap_or(defaults.sync.batch_size),
                retag_source: var("RETAG_SOURCE")?.unwrap_or(defaults.sync.retag_source),
                cumulative_source: var("CUMULATIVE_SOURCE")?
                    .unwrap_or(defaults.sync.cumulative_source),
            },
            activity_log: ActivityLogConfig {
                path: var("ACTIVITY_LOG_PATH")?
                    .map(PathBuf::from)
                    .unwrap_or(defaults.activity_log.path),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<String, env::VarError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned().ok_or(env::VarError::NotPresent)
    }

    #[test]
    fn test_empty_environment_uses_defaults() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.database.url, "sqlite:./steps.db");
        assert_eq!(config.sync.interval_secs, 900);
        assert_eq!(config.sync.retag_source, DEFAULT_RETAG_SOURCE);
        assert_eq!(config.sync.cumulative_source, DEFAULT_CUMULATIVE_SOURCE);
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = Config::from_lookup(lookup_from(&[
            ("SERVER_PORT", "8080"),
            ("SYNC_INTERVAL_SECS", "not-a-number"),
            ("SYNC_BATCH_SIZE", "0"),
            ("CUMULATIVE_SOURCE", "com.example.band"),
            ("ACTIVITY_LOG_PATH", "/tmp/steps.log"),
        ]))
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.sync.interval_secs, 900);
        assert_eq!(config.sync.batch_size, 1000);
        assert_eq!(config.sync.cumulative_source, "com.example.band");
        assert_eq!(config.activity_log.path, PathBuf::from("/tmp/steps.log"));
    }

    #[test]
    fn test_interval_never_zero() {
        let mut config = Config::default();
        config.sync.interval_secs = 0;
        assert_eq!(config.sync.interval(), Duration::from_secs(1));
    }
}
