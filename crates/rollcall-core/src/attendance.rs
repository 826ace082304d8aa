//! Attendance log: one SQLite row per successful match.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AttendanceError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub name: String,
    pub distance: f32,
    /// RFC 3339, UTC.
    pub marked_at: String,
}

pub struct AttendanceLog {
    conn: Connection,
}

impl AttendanceLog {
    pub fn open(path: &Path) -> Result<Self, AttendanceError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let log = Self::init(Connection::open(path)?)?;
        tracing::debug!(path = %path.display(), "attendance log opened");
        Ok(log)
    }

    pub fn open_in_memory() -> Result<Self, AttendanceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AttendanceError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS attendance (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                distance REAL NOT NULL,
                marked_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self { conn })
    }

    /// Record a mark. Repeated marks for the same name are all kept.
    pub fn record(&self, name: &str, distance: f32) -> Result<AttendanceRecord, AttendanceError> {
        let record = AttendanceRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            distance,
            marked_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        };

        self.conn.execute(
            "INSERT INTO attendance (id, name, distance, marked_at) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.name, record.distance as f64, record.marked_at],
        )?;

        tracing::info!(name, distance, id = %record.id, "attendance marked");
        Ok(record)
    }

    /// Most recent marks first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AttendanceRecord>, AttendanceError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, distance, marked_at FROM attendance
             ORDER BY marked_at DESC, rowid DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AttendanceRecord {
                id: row.get(0)?,
                name: row.get(1)?,
                distance: row.get::<_, f64>(2)? as f32,
                marked_at: row.get(3)?,
            })
        })?;

        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
