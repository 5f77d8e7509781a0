// THEORY:
// `SqliteSink` is the durable `EventSink`. Every transition becomes one row in the
// `detections` table; row ids double as the public event identifiers.
//
// The database runs in WAL mode with two connections: the frame loop writes through
// one while status readers list history through the other, so a slow dashboard
// request never holds the lock an append is waiting on.

use crate::event::{EventRecord, EventStatus, StoredEvent};
use crate::sink::{EventSink, SinkError};
use chrono::DateTime;
use parking_lot::Mutex;
use rusqlite::{Connection, Row, params};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS detections (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        occurred_at INTEGER NOT NULL,
        time        TEXT    NOT NULL,
        status      TEXT    NOT NULL,
        confidence  INTEGER NOT NULL,
        gps         TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS detections_recency ON detections (occurred_at DESC, id DESC);
";

const SELECT_NEWEST_FIRST: &str =
    "SELECT id, occurred_at, status, confidence, gps FROM detections ORDER BY occurred_at DESC, id DESC";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Rows SQLite could not hand back as the expected types are corrupt. Everything
/// else means the store itself is not usable.
fn store_error(err: rusqlite::Error) -> SinkError {
    match err {
        rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => SinkError::Corrupt {
            id: "unknown".to_string(),
            reason: err.to_string(),
        },
        _ => SinkError::Unavailable(err.to_string()),
    }
}

/// A row as stored, before the per-status rules are re-applied.
struct RawRow {
    id: i64,
    occurred_at: i64,
    status: String,
    confidence: i64,
    gps: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            occurred_at: row.get(1)?,
            status: row.get(2)?,
            confidence: row.get(3)?,
            gps: row.get(4)?,
        })
    }

    fn into_event(self) -> Result<StoredEvent, SinkError> {
        let id = self.id.to_string();
        let corrupt = |reason: String| SinkError::Corrupt {
            id: id.clone(),
            reason,
        };

        let timestamp = DateTime::from_timestamp_micros(self.occurred_at)
            .ok_or_else(|| corrupt(format!("timestamp {} out of range", self.occurred_at)))?;
        let status: EventStatus = self.status.parse().map_err(|e| corrupt(format!("{e}")))?;
        let confidence = u8::try_from(self.confidence)
            .map_err(|_| corrupt(format!("confidence {} out of range", self.confidence)))?;

        Ok(StoredEvent {
            id: id.clone(),
            record: EventRecord::restore(timestamp, status, confidence, self.gps),
        })
    }
}

/// SQLite-backed event store.
pub struct SqliteSink {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteSink {
    /// Opens (creating if needed) the database at `path` and verifies it is usable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();

        let writer = Connection::open(&path).map_err(store_error)?;
        writer.busy_timeout(BUSY_TIMEOUT).map_err(store_error)?;
        let mode: String = writer
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(store_error)?;
        writer.execute_batch(SCHEMA).map_err(store_error)?;

        let reader = Connection::open(&path).map_err(store_error)?;
        reader.busy_timeout(BUSY_TIMEOUT).map_err(store_error)?;
        let _: i64 = reader
            .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))
            .map_err(store_error)?;

        debug!(path = %path.display(), journal_mode = %mode, "event store opened");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for SqliteSink {
    fn append(&self, record: &EventRecord) -> Result<String, SinkError> {
        let writer = self.writer.lock();
        writer.execute(
            "INSERT INTO detections (occurred_at, time, status, confidence, gps) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.timestamp().timestamp_micros(),
                record.display_time(),
                record.status().as_str(),
                i64::from(record.confidence()),
                record.location(),
            ],
        )
        .map_err(store_error)?;
        Ok(writer.last_insert_rowid().to_string())
    }

    fn most_recent(&self) -> Result<Option<EventRecord>, SinkError> {
        let reader = self.reader.lock();
        let mut stmt = reader.prepare(&format!("{SELECT_NEWEST_FIRST} LIMIT 1")).map_err(store_error)?;
        let mut rows = stmt.query_map([], RawRow::read).map_err(store_error)?;
        match rows.next() {
            Some(raw) => Ok(Some(raw.map_err(store_error)?.into_event()?.record)),
            None => Ok(None),
        }
    }

    fn all(&self) -> Result<Vec<StoredEvent>, SinkError> {
        let reader = self.reader.lock();
        let mut stmt = reader.prepare(SELECT_NEWEST_FIRST).map_err(store_error)?;
        let rows = stmt.query_map([], RawRow::read).map_err(store_error)?;
        rows.map(|raw| raw.map_err(store_error)?.into_event()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn temp_sink() -> (tempfile::TempDir, SqliteSink) {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = SqliteSink::open(dir.path().join("events.db")).expect("open sqlite sink");
        (dir, sink)
    }

    #[test]
    fn fresh_database_is_empty() {
        let (_dir, sink) = temp_sink();
        assert!(sink.most_recent().unwrap().is_none());
        assert!(sink.all().unwrap().is_empty());
    }

    #[test]
    fn appended_records_come_back_newest_first() {
        let (_dir, sink) = temp_sink();
        let now = Utc::now();
        let first = sink
            .append(&EventRecord::activated(now - ChronoDuration::seconds(3), 100, "26.4567°N, 88.4567°E"))
            .unwrap();
        let second = sink.append(&EventRecord::cleared(now)).unwrap();

        let events = sink.all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, second);
        assert_eq!(events[0].record.status(), EventStatus::Cleared);
        assert_eq!(events[1].id, first);
        assert_eq!(events[1].record.confidence(), 100);
        assert_eq!(events[1].record.location(), "26.4567°N, 88.4567°E");
        assert_eq!(sink.most_recent().unwrap().unwrap().status(), EventStatus::Cleared);
    }

    #[test]
    fn history_survives_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let stamp = Utc::now();
        {
            let sink = SqliteSink::open(&path).unwrap();
            sink.append(&EventRecord::activated(stamp, 100, "roof")).unwrap();
        }
        let reopened = SqliteSink::open(&path).unwrap();
        let latest = reopened.most_recent().unwrap().expect("record persisted");
        assert!(latest.is_active());
        assert_eq!(latest.timestamp().timestamp_micros(), stamp.timestamp_micros());
    }

    #[test]
    fn corrupt_rows_are_reported_not_skipped() {
        let (_dir, sink) = temp_sink();
        sink.writer
            .lock()
            .execute(
                "INSERT INTO detections (occurred_at, time, status, confidence, gps) VALUES (0, '', 'Smoldering', 0, '')",
                [],
            )
            .unwrap();
        assert!(matches!(sink.all(), Err(SinkError::Corrupt { .. })));
    }

    #[test]
    fn mistyped_columns_are_corrupt() {
        let (_dir, sink) = temp_sink();
        sink.writer
            .lock()
            .execute(
                "INSERT INTO detections (occurred_at, time, status, confidence, gps) VALUES (0, '', 'Active', 'high', '')",
                [],
            )
            .unwrap();
        assert!(matches!(sink.most_recent(), Err(SinkError::Corrupt { .. })));
    }

    #[test]
    fn unreachable_path_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-dir").join("events.db");
        assert!(matches!(SqliteSink::open(missing), Err(SinkError::Unavailable(_))));
    }
}
