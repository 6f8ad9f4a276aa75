//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::prefs::PreferenceStore;
use crate::scheduler::CycleRunner;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: Option<SqlitePool>,
    runner: Arc<CycleRunner>,
    prefs: Arc<dyn PreferenceStore>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: Option<SqlitePool>,
        runner: Arc<CycleRunner>,
        prefs: Arc<dyn PreferenceStore>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                runner,
                prefs,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool, when running against SQLite
    pub fn db(&self) -> Option<&SqlitePool> {
        self.inner.db.as_ref()
    }

    /// Get the cycle runner
    pub fn runner(&self) -> &Arc<CycleRunner> {
        &self.inner.runner
    }

    /// Get the preference store
    pub fn prefs(&self) -> &dyn PreferenceStore {
        &*self.inner.prefs
    }
}
