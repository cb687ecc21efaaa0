// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite sink
//!
//! Each sampling cycle becomes one transaction: either every reading of the
//! cycle is stored or none is.

use super::{Sink, SinkError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use std::path::{Path, PathBuf};

/// Timestamp layout of the `timestamp` column.
pub const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// SQLite sink
///
/// # Schema
///
/// ```sql
/// CREATE TABLE t_events (
///     timestamp TEXT,
///     sensor TEXT,
///     value REAL
/// );
/// ```
pub struct SqliteSink {
    path: PathBuf,
    conn: Option<Connection>,
    staged: Vec<(String, String, f64)>,
}

impl SqliteSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            conn: None,
            staged: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows currently stored in `t_events`.
    pub fn row_count(&self) -> Result<u64, SinkError> {
        let conn = self.conn.as_ref().ok_or(SinkError::NotReady("sqlite"))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM t_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS t_events (
                timestamp TEXT,
                sensor TEXT,
                value REAL
            )",
            [],
        )?;
        Ok(())
    }
}

fn insert_staged(tx: &Transaction<'_>, rows: &[(String, String, f64)]) -> rusqlite::Result<()> {
    let mut stmt =
        tx.prepare_cached("INSERT INTO t_events (timestamp, sensor, value) VALUES (?1, ?2, ?3)")?;
    for (timestamp, sensor, value) in rows {
        stmt.execute(params![timestamp, sensor, value])?;
    }
    Ok(())
}

impl Sink for SqliteSink {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn setup(&mut self) -> Result<(), SinkError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&self.path)?;
        Self::init_schema(&conn)?;
        self.conn = Some(conn);
        self.staged.clear();

        tracing::info!(path = %self.path.display(), "SQLite sink opened");
        Ok(())
    }

    fn begin(&mut self) -> Result<(), SinkError> {
        self.staged.clear();
        Ok(())
    }

    fn store(&mut self, timestamp: DateTime<Utc>, key: &str, value: f64) -> Result<(), SinkError> {
        if self.conn.is_none() {
            return Err(SinkError::NotReady("sqlite"));
        }
        self.staged.push((
            timestamp.format(SQLITE_TIMESTAMP_FORMAT).to_string(),
            key.to_string(),
            value,
        ));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), SinkError> {
        let conn = self.conn.as_mut().ok_or(SinkError::NotReady("sqlite"))?;
        if self.staged.is_empty() {
            return Ok(());
        }

        let tx = conn.transaction()?;
        match insert_staged(&tx, &self.staged) {
            Ok(()) => {
                tx.commit()?;
                tracing::debug!(rows = self.staged.len(), "SQLite cycle committed");
                self.staged.clear();
                Ok(())
            }
            Err(e) => {
                let rows = self.staged.len();
                self.staged.clear();
                if let Err(rollback) = tx.rollback() {
                    tracing::error!(error = %rollback, "SQLite rollback failed");
                }
                tracing::warn!(rows, error = %e, "SQLite cycle rolled back");
                Err(e.into())
            }
        }
    }

    fn teardown(&mut self) -> Result<(), SinkError> {
        if !self.staged.is_empty() {
            tracing::debug!(rows = self.staged.len(), "Discarding uncommitted rows");
            self.staged.clear();
        }
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
            tracing::info!(path = %self.path.display(), "SQLite sink closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn rows(path: &Path) -> Vec<(String, String, f64)> {
        let conn = Connection::open(path).unwrap();
        let mut stmt = conn
            .prepare("SELECT timestamp, sensor, value FROM t_events ORDER BY rowid")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_cycle_commits_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.db");
        let mut sink = SqliteSink::new(&path);
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap();

        sink.setup().unwrap();
        sink.begin().unwrap();
        sink.store(ts, "humidity", 55.0).unwrap();
        sink.store(ts, "temperature", 21.0).unwrap();
        sink.commit().unwrap();
        assert_eq!(sink.row_count().unwrap(), 2);
        sink.teardown().unwrap();

        assert_eq!(
            rows(&path),
            vec![
                ("2024-03-01T12:30:05".to_string(), "humidity".to_string(), 55.0),
                ("2024-03-01T12:30:05".to_string(), "temperature".to_string(), 21.0),
            ]
        );
    }

    #[test]
    fn test_failed_commit_leaves_no_partial_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.db");
        let mut sink = SqliteSink::new(&path);
        sink.setup().unwrap();

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON t_events
                 WHEN NEW.sensor = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();
        }

        let ts = Utc::now();
        sink.begin().unwrap();
        sink.store(ts, "a", 1.0).unwrap();
        sink.store(ts, "bad", 2.0).unwrap();
        sink.store(ts, "c", 3.0).unwrap();
        assert!(matches!(sink.commit(), Err(SinkError::Sqlite(_))));
        assert_eq!(sink.row_count().unwrap(), 0);

        // The next cycle is unaffected.
        sink.begin().unwrap();
        sink.store(ts, "a", 4.0).unwrap();
        sink.commit().unwrap();
        assert_eq!(sink.row_count().unwrap(), 1);
        sink.teardown().unwrap();
    }

    #[test]
    fn test_begin_discards_staged_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.db");
        let mut sink = SqliteSink::new(&path);
        sink.setup().unwrap();

        sink.begin().unwrap();
        sink.store(Utc::now(), "lost", 1.0).unwrap();
        sink.begin().unwrap();
        sink.store(Utc::now(), "kept", 2.0).unwrap();
        sink.commit().unwrap();
        sink.teardown().unwrap();

        let stored = rows(&path);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].1, "kept");
    }

    #[test]
    fn test_setup_reuses_existing_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.db");

        for value in [1.0, 2.0] {
            let mut sink = SqliteSink::new(&path);
            sink.setup().unwrap();
            sink.begin().unwrap();
            sink.store(Utc::now(), "t", value).unwrap();
            sink.commit().unwrap();
            sink.teardown().unwrap();
        }

        assert_eq!(rows(&path).len(), 2);
    }

    #[test]
    fn test_store_before_setup() {
        let mut sink = SqliteSink::new("unused.db");
        assert!(matches!(
            sink.store(Utc::now(), "t", 1.0),
            Err(SinkError::NotReady("sqlite"))
        ));
        assert!(sink.commit().is_err());
    }
}
