//! Preference persistence
//!
//! SQLite storage for the `preferences` key/value table.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::PreferenceStore;
use crate::error::{Result, SyncError};

/// Repository for durable preferences
#[derive(Clone)]
pub struct SqlitePreferences {
    pool: SqlitePool,
}

impl SqlitePreferences {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn unavailable(e: sqlx::Error) -> SyncError {
    SyncError::StateUnavailable(e.to_string())
}

#[async_trait]
impl PreferenceStore for SqlitePreferences {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM preferences WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(row.map(|(value,)| value))
    }

    async fn put_all(&self, entries: &[(&str, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO preferences (key, value, updated_at)
                VALUES (?, ?, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(*key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;
        Ok(())
    }
}
