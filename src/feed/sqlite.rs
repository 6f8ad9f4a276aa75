//! Durable change feed
//!
//! SQLite storage for step records plus an append-only change log whose
//! sequence numbers serve as cursors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use super::{ChangeFeedClient, ChangesResponse, InsertOutcome};
use crate::error::{Result, SyncError};
use crate::records::{ChangeEvent, Cursor, DeviceClass, DeviceDescriptor, RecordType, StepRecord};

/// Change feed backed by the `step_records` and `step_changes` tables
#[derive(Clone)]
pub struct SqliteChangeFeed {
    pool: SqlitePool,
    batch_size: u32,
}

impl SqliteChangeFeed {
    pub fn new(pool: SqlitePool, batch_size: u32) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    async fn last_seq(&self) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(seq), 0) FROM step_changes")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    async fn read_changes(&self, cursor: &Cursor) -> Result<ChangesResponse> {
        let position: i64 = cursor
            .as_str()
            .parse()
            .map_err(|_| SyncError::CursorExpired(format!("unrecognised cursor '{}'", cursor)))?;

        let last = self.last_seq().await?;
        if position < 0 || position > last {
            return Err(SyncError::CursorExpired(format!(
                "cursor {} is outside the change log (last sequence {})",
                position, last
            )));
        }

        // One extra row tells us whether more changes are pending
        let mut rows = sqlx::query_as::<_, ChangeRow>(
            r#"
            SELECT seq, kind, source_id, record_id, record_version, count,
                   start_time, end_time, device_manufacturer, device_model, device_type
            FROM step_changes
            WHERE seq > ?
            ORDER BY seq ASC
            LIMIT ?
            "#,
        )
        .bind(position)
        .bind(self.batch_size as i64 + 1)
        .fetch_all(&self.pool)
        .await?;

        let has_more = rows.len() > self.batch_size as usize;
        rows.truncate(self.batch_size as usize);

        let next = rows.last().map(|r| r.seq).unwrap_or(position);
        let events = rows.into_iter().map(ChangeRow::into_event).collect();

        Ok(ChangesResponse {
            events,
            next_cursor: Cursor::new(next.to_string()),
            has_more,
        })
    }
}

/// Upsert keyed by source and record id; older or equal versions are ignored
async fn upsert_record(conn: &mut SqliteConnection, record: &StepRecord) -> Result<bool> {
    let count = count_column(record)?;

    let existing: Option<(i64,)> = sqlx::query_as(
        "SELECT record_version FROM step_records WHERE source_id = ? AND record_id = ?",
    )
    .bind(&record.source_id)
    .bind(&record.record_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some((version,)) = existing {
        if version >= record.record_version {
            return Ok(false);
        }
    }

    sqlx::query(
        r#"
        INSERT INTO step_records (
            source_id, record_id, record_version, count, start_time, end_time,
            device_manufacturer, device_model, device_type
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source_id, record_id) DO UPDATE SET
            record_version = excluded.record_version,
            count = excluded.count,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            device_manufacturer = excluded.device_manufacturer,
            device_model = excluded.device_model,
            device_type = excluded.device_type,
            updated_at = datetime('now')
        "#,
    )
    .bind(&record.source_id)
    .bind(&record.record_id)
    .bind(record.record_version)
    .bind(count)
    .bind(record.start_time.timestamp_millis())
    .bind(record.end_time.timestamp_millis())
    .bind(&record.device.manufacturer)
    .bind(&record.device.model)
    .bind(record.device.class.ordinal())
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO step_changes (
            kind, source_id, record_id, record_version, count, start_time, end_time,
            device_manufacturer, device_model, device_type
        ) VALUES ('upsert', ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.source_id)
    .bind(&record.record_id)
    .bind(record.record_version)
    .bind(count)
    .bind(record.start_time.timestamp_millis())
    .bind(record.end_time.timestamp_millis())
    .bind(&record.device.manufacturer)
    .bind(&record.device.model)
    .bind(record.device.class.ordinal())
    .execute(&mut *conn)
    .await?;

    Ok(true)
}

fn count_column(record: &StepRecord) -> Result<i64> {
    i64::try_from(record.count).map_err(|_| {
        SyncError::InvalidRecord(format!(
            "record {} count {} does not fit the store",
            record.record_id, record.count
        ))
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| SyncError::InvalidRecord(format!("timestamp {} out of range", millis)))
}

#[async_trait]
impl ChangeFeedClient for SqliteChangeFeed {
    async fn get_initial_token(&self, _record_types: &[RecordType]) -> Result<Cursor> {
        let last = self
            .last_seq()
            .await
            .map_err(|e| SyncError::FeedUnavailable(e.to_string()))?;
        Ok(Cursor::new(last.to_string()))
    }

    async fn get_changes(&self, cursor: &Cursor) -> Result<ChangesResponse> {
        self.read_changes(cursor).await.map_err(|e| match e {
            SyncError::CursorExpired(_) => e,
            other => SyncError::FeedUnavailable(other.to_string()),
        })
    }

    async fn insert(&self, records: &[StepRecord]) -> Result<InsertOutcome> {
        let first_id = records
            .first()
            .map(|r| r.record_id.clone())
            .unwrap_or_default();
        let to_write_failure = |e: SyncError| SyncError::write_failure(&first_id, e.to_string());

        for record in records {
            record.validate()?;
            count_column(record)?;
        }

        let mut tx = self.pool.begin().await.map_err(|e| to_write_failure(e.into()))?;
        let mut outcome = InsertOutcome::default();
        for record in records {
            if upsert_record(&mut tx, record).await.map_err(to_write_failure)? {
                outcome.inserted += 1;
            } else {
                outcome.already_present += 1;
            }
        }
        tx.commit().await.map_err(|e| to_write_failure(e.into()))?;

        Ok(outcome)
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    source_id: String,
    record_id: String,
    record_version: i64,
    count: i64,
    start_time: i64,
    end_time: i64,
    device_manufacturer: String,
    device_model: String,
    device_type: i64,
}

impl RecordRow {
    fn into_record(self) -> Result<StepRecord> {
        Ok(StepRecord {
            count: u64::try_from(self.count).map_err(|_| {
                SyncError::InvalidRecord(format!(
                    "record {} has negative count {}",
                    self.record_id, self.count
                ))
            })?,
            start_time: millis_to_datetime(self.start_time)?,
            end_time: millis_to_datetime(self.end_time)?,
            source_id: self.source_id,
            record_id: self.record_id,
            record_version: self.record_version,
            device: DeviceDescriptor {
                manufacturer: self.device_manufacturer,
                model: self.device_model,
                class: DeviceClass::from_ordinal(self.device_type),
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChangeRow {
    seq: i64,
    kind: String,
    source_id: String,
    record_id: String,
    record_version: Option<i64>,
    count: Option<i64>,
    start_time: Option<i64>,
    end_time: Option<i64>,
    device_manufacturer: Option<String>,
    device_model: Option<String>,
    device_type: Option<i64>,
}

impl ChangeRow {
    fn into_event(self) -> ChangeEvent {
        match self.kind.as_str() {
            "delete" => ChangeEvent::Delete {
                record_id: self.record_id,
            },
            "upsert" => {
                let seq = self.seq;
                match self.into_upsert() {
                    Some(record) => ChangeEvent::Upsert(record),
                    None => {
                        tracing::warn!(seq, "Malformed upsert row in change log");
                        ChangeEvent::Other
                    }
                }
            }
            _ => ChangeEvent::Other,
        }
    }

    fn into_upsert(self) -> Option<StepRecord> {
        let record = RecordRow {
            source_id: self.source_id,
            record_id: self.record_id,
            record_version: self.record_version?,
            count: self.count?,
            start_time: self.start_time?,
            end_time: self.end_time?,
            device_manufacturer: self.device_manufacturer.unwrap_or_default(),
            device_model: self.device_model.unwrap_or_default(),
            device_type: self.device_type.unwrap_or(0),
        };
        record.into_record().ok()
    }
}
