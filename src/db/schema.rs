//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Current state of every step record, one row per logical record
CREATE TABLE IF NOT EXISTS step_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id TEXT NOT NULL,
    record_id TEXT NOT NULL,
    record_version INTEGER NOT NULL,
    count INTEGER NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    device_manufacturer TEXT NOT NULL DEFAULT '',
    device_model TEXT NOT NULL DEFAULT '',
    device_type INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),

    UNIQUE(source_id, record_id)
);

CREATE INDEX IF NOT EXISTS idx_step_records_end_time ON step_records(end_time);

-- Append-only change log; seq is the feed cursor position
CREATE TABLE IF NOT EXISTS step_changes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL CHECK (kind IN ('upsert', 'delete')),
    source_id TEXT NOT NULL,
    record_id TEXT NOT NULL,
    record_version INTEGER,
    count INTEGER,
    start_time INTEGER,
    end_time INTEGER,
    device_manufacturer TEXT,
    device_model TEXT,
    device_type INTEGER,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Durable key/value preferences (cursor, quirk state, device identity, flags)
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;
