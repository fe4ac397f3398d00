//! Embedded store-and-forward buffer for events the remote store could not
//! take.
//!
//! A single SQLite table, insertion-ordered by rowid. Rows are deleted only
//! after the remote write for that row is confirmed, so a crash mid-sync
//! costs at most a duplicate remote row, never a lost event.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;

use crate::event::{Event, EventKind};

/// Local queue failures.
///
/// These are the non-retryable kind: if the local disk cannot take an
/// event, there is no tertiary fallback.
#[derive(Debug)]
pub enum QueueError {
    Open(String),
    Storage(String),
    Corrupt(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Open(e) => write!(f, "queue open error: {e}"),
            QueueError::Storage(e) => write!(f, "queue storage error: {e}"),
            QueueError::Corrupt(e) => write!(f, "queue corrupt row: {e}"),
        }
    }
}

impl std::error::Error for QueueError {}

/// A buffered event plus the row id used for post-sync deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub id: i64,
    pub event: Event,
}

/// Restart-durable event buffer backed by an embedded SQLite file.
pub struct LocalQueue {
    conn: Connection,
}

impl LocalQueue {
    /// Open (and initialize if absent) the buffer at `path`.
    pub fn open(path: &Path) -> Result<Self, QueueError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QueueError::Open(e.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|e| QueueError::Open(e.to_string()))?;
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            tracing::warn!(error = %e, "could not enable WAL on event buffer");
        }
        Self::init(conn)
    }

    /// An in-memory buffer for tests.
    pub fn open_in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().map_err(|e| QueueError::Open(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, QueueError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS event_buffer (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                point_id INTEGER NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                measure INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| QueueError::Open(e.to_string()))?;
        Ok(Self { conn })
    }

    /// Append an event; returns the new row id.
    pub fn push(&mut self, event: &Event) -> Result<i64, QueueError> {
        self.conn
            .execute(
                "INSERT INTO event_buffer (kind, point_id, started_at, ended_at, measure)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.kind.as_str(),
                    event.point_id,
                    event.started_at.to_rfc3339(),
                    event.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    event.measure,
                ],
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All buffered events, oldest first.
    pub fn pending(&self) -> Result<Vec<QueuedEvent>, QueueError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, kind, point_id, started_at, ended_at, measure
                 FROM event_buffer ORDER BY id ASC",
            )
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let mut rows = stmt
            .query([])
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| QueueError::Storage(e.to_string()))? {
            let id: i64 = row.get(0).map_err(|e| QueueError::Storage(e.to_string()))?;
            let kind_raw: String = row.get(1).map_err(|e| QueueError::Storage(e.to_string()))?;
            let kind = EventKind::parse(&kind_raw)
                .ok_or_else(|| QueueError::Corrupt(format!("unknown event kind '{kind_raw}'")))?;
            let point_id: i64 = row.get(2).map_err(|e| QueueError::Storage(e.to_string()))?;
            let started_raw: String =
                row.get(3).map_err(|e| QueueError::Storage(e.to_string()))?;
            let ended_raw: Option<String> =
                row.get(4).map_err(|e| QueueError::Storage(e.to_string()))?;
            let measure: i64 = row.get(5).map_err(|e| QueueError::Storage(e.to_string()))?;

            out.push(QueuedEvent {
                id,
                event: Event {
                    kind,
                    point_id,
                    started_at: parse_rfc3339(&started_raw)?,
                    ended_at: ended_raw.as_deref().map(parse_rfc3339).transpose()?,
                    measure,
                },
            });
        }
        Ok(out)
    }

    /// Delete a synced row. Called only after remote commit confirmation.
    pub fn delete(&mut self, id: i64) -> Result<(), QueueError> {
        self.conn
            .execute("DELETE FROM event_buffer WHERE id = ?1", params![id])
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Number of buffered events.
    pub fn len(&self) -> Result<usize, QueueError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM event_buffer", [], |row| row.get(0))
            .map_err(|e| QueueError::Storage(e.to_string()))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| QueueError::Corrupt(format!("invalid timestamp '{raw}': {e}")))
}
