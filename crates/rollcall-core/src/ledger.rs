//! Attendance ledger: one table per session, one row per identity.
//!
//! The table's primary key is the authority on "already recorded"; any
//! in-memory tracking on top of it is a cache.

use crate::session::SessionKey;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Local-time format of stored attendance timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("no attendance recorded for session {0}")]
    SessionNotFound(SessionKey),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of marking attendance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// A new row was written.
    Recorded,
    /// A row already existed; nothing was written.
    AlreadyRecorded,
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub identity: String,
    pub timestamp: String,
}

/// Per-session attendance storage with insert-or-report-existing semantics.
pub trait AttendanceLedger {
    /// Create the session's table if absent.
    fn ensure_session(&self, session: &SessionKey) -> Result<(), LedgerError>;

    /// Record `identity` for `session` unless already present.
    fn mark_attendance(
        &self,
        session: &SessionKey,
        identity: &str,
    ) -> Result<MarkOutcome, LedgerError>;

    /// All rows of `session`, in recording order.
    fn retrieve(&self, session: &SessionKey) -> Result<Vec<AttendanceRecord>, LedgerError>;

    /// Keys of every session present in the ledger, sorted.
    fn sessions(&self) -> Result<Vec<SessionKey>, LedgerError>;
}

/// SQLite-backed ledger.
pub struct SqliteLedger {
    conn: Connection,
}

impl SqliteLedger {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// SQLite table names are case-insensitive.
    fn session_exists(&self, session: &SessionKey) -> Result<bool, LedgerError> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master \
             WHERE type = 'table' AND name = ?1 COLLATE NOCASE)",
            params![session.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn require_session(&self, session: &SessionKey) -> Result<String, LedgerError> {
        if !self.session_exists(session)? {
            return Err(LedgerError::SessionNotFound(session.clone()));
        }
        Ok(quote_ident(session.as_str()))
    }

    /// Insert a row, treating a primary-key conflict as an existing record.
    fn insert_record(
        &self,
        table: &str,
        identity: &str,
        timestamp: &str,
    ) -> Result<MarkOutcome, LedgerError> {
        let sql = format!("INSERT INTO {table} (id, timestamp) VALUES (?1, ?2)");
        match self.conn.execute(&sql, params![identity, timestamp]) {
            Ok(_) => {
                tracing::info!(identity, timestamp, "attendance recorded");
                Ok(MarkOutcome::Recorded)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                tracing::info!(identity, "attendance row appeared concurrently; keeping existing");
                Ok(MarkOutcome::AlreadyRecorded)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl AttendanceLedger for SqliteLedger {
    fn ensure_session(&self, session: &SessionKey) -> Result<(), LedgerError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, timestamp TEXT NOT NULL)",
            quote_ident(session.as_str())
        );
        self.conn.execute(&sql, [])?;
        tracing::debug!(%session, "session table ready");
        Ok(())
    }

    fn mark_attendance(
        &self,
        session: &SessionKey,
        identity: &str,
    ) -> Result<MarkOutcome, LedgerError> {
        let table = self.require_session(session)?;

        let existing: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT timestamp FROM {table} WHERE id = ?1"),
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(timestamp) = existing {
            tracing::info!(identity, %timestamp, "attendance already recorded for this session");
            return Ok(MarkOutcome::AlreadyRecorded);
        }

        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        self.insert_record(&table, identity, &timestamp)
    }

    fn retrieve(&self, session: &SessionKey) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let table = self.require_session(session)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT id, timestamp FROM {table} ORDER BY rowid"))?;
        let rows = stmt.query_map([], |row| {
            Ok(AttendanceRecord {
                identity: row.get(0)?,
                timestamp: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn sessions(&self) -> Result<Vec<SessionKey>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(names
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(SessionKey::from_raw)
            .collect())
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use chrono::NaiveDateTime;

    fn reference_key() -> SessionKey {
        Session::parse("SE-223", "A", "Spring 2025", "2025-04-01")
            .unwrap()
            .key()
    }

    fn ready_ledger() -> (SqliteLedger, SessionKey) {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let key = reference_key();
        ledger.ensure_session(&key).unwrap();
        (ledger, key)
    }

    #[test]
    fn test_mark_twice_yields_one_row() {
        let (ledger, key) = ready_ledger();
        assert_eq!(ledger.mark_attendance(&key, "12345").unwrap(), MarkOutcome::Recorded);
        assert_eq!(
            ledger.mark_attendance(&key, "12345").unwrap(),
            MarkOutcome::AlreadyRecorded
        );
        let rows = ledger.retrieve(&key).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].identity, "12345");
    }

    #[test]
    fn test_constraint_violation_reported_as_already_recorded() {
        let (ledger, key) = ready_ledger();
        let table = quote_ident(key.as_str());
        assert_eq!(
            ledger.insert_record(&table, "alice", "2025-04-01 09:00:00").unwrap(),
            MarkOutcome::Recorded
        );
        assert_eq!(
            ledger.insert_record(&table, "alice", "2025-04-01 09:00:05").unwrap(),
            MarkOutcome::AlreadyRecorded
        );
        let rows = ledger.retrieve(&key).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, "2025-04-01 09:00:00");
    }

    #[test]
    fn test_timestamp_format() {
        let (ledger, key) = ready_ledger();
        ledger.mark_attendance(&key, "alice").unwrap();
        let rows = ledger.retrieve(&key).unwrap();
        assert!(NaiveDateTime::parse_from_str(&rows[0].timestamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[test]
    fn test_retrieve_preserves_recording_order() {
        let (ledger, key) = ready_ledger();
        for id in ["carol", "alice", "bob"] {
            ledger.mark_attendance(&key, id).unwrap();
        }
        let ids: Vec<String> = ledger
            .retrieve(&key)
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(ids, vec!["carol", "alice", "bob"]);
    }

    #[test]
    fn test_retrieve_missing_session() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let err = ledger.retrieve(&reference_key()).unwrap_err();
        assert!(matches!(err, LedgerError::SessionNotFound(ref k) if *k == reference_key()));
    }

    #[test]
    fn test_mark_requires_session() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let err = ledger.mark_attendance(&reference_key(), "alice").unwrap_err();
        assert!(matches!(err, LedgerError::SessionNotFound(_)));
    }

    #[test]
    fn test_ensure_session_is_idempotent() {
        let (ledger, key) = ready_ledger();
        ledger.mark_attendance(&key, "alice").unwrap();
        ledger.ensure_session(&key).unwrap();
        assert_eq!(ledger.retrieve(&key).unwrap().len(), 1);
        assert_eq!(ledger.sessions().unwrap(), vec![key]);
    }

    #[test]
    fn test_sessions_sorted() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let later = Session::parse("SE-223", "A", "Spring 2025", "2025-04-02").unwrap().key();
        let earlier = reference_key();
        ledger.ensure_session(&later).unwrap();
        ledger.ensure_session(&earlier).unwrap();
        assert_eq!(ledger.sessions().unwrap(), vec![earlier, later]);
    }

    #[test]
    fn test_hostile_key_is_quoted() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        let key = SessionKey::from_raw("x\"; DROP TABLE students; --");
        ledger.ensure_session(&key).unwrap();
        assert_eq!(ledger.mark_attendance(&key, "alice").unwrap(), MarkOutcome::Recorded);
        assert_eq!(ledger.retrieve(&key).unwrap().len(), 1);
    }

    #[test]
    fn test_mixed_case_table_from_older_database() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger
            .conn
            .execute_batch(
                "CREATE TABLE \"2025_04_01_Spring_2025_SE_223_A\" \
                 (id TEXT PRIMARY KEY, timestamp TEXT NOT NULL);
                 INSERT INTO \"2025_04_01_Spring_2025_SE_223_A\" \
                 VALUES ('12345', '2025-04-01 09:00:00');",
            )
            .unwrap();
        let key = Session::parse("SE_223", "A", "Spring 2025", "2025-04-01")
            .unwrap()
            .key();

        ledger.ensure_session(&key).unwrap();
        assert_eq!(
            ledger.mark_attendance(&key, "12345").unwrap(),
            MarkOutcome::AlreadyRecorded
        );
        assert_eq!(ledger.mark_attendance(&key, "alice").unwrap(), MarkOutcome::Recorded);

        let ids: Vec<String> = ledger
            .retrieve(&key)
            .unwrap()
            .into_iter()
            .map(|r| r.identity)
            .collect();
        assert_eq!(ids, vec!["12345", "alice"]);
        assert_eq!(ledger.sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_existing_row_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("attendance_system.db");
        let key = reference_key();

        let first = SqliteLedger::open(&path).unwrap();
        first.ensure_session(&key).unwrap();
        assert_eq!(first.mark_attendance(&key, "12345").unwrap(), MarkOutcome::Recorded);
        drop(first);

        let second = SqliteLedger::open(&path).unwrap();
        second.ensure_session(&key).unwrap();
        assert_eq!(
            second.mark_attendance(&key, "12345").unwrap(),
            MarkOutcome::AlreadyRecorded
        );
    }
}
