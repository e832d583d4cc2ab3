//! SQLite results store: WAL-mode database of submitted reports.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, params};

use crate::core::errors::{PchError, Result};
use crate::report::collector::ResultsCollector;
use crate::report::log::ReportLog;

/// Collector that persists every report and its raw samples.
pub struct SqliteCollector {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteCollector {
    /// Open (or create) the database at `path`, applying schema and PRAGMAs.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PchError::io(parent, source))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        apply_pragmas(&conn)?;
        apply_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn report_count(&self) -> Result<i64> {
        let count = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Every stored sample for `label`, oldest report first, in recorded order.
    pub fn metric_values_for(&self, label: &str) -> Result<Vec<f64>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT value FROM metric_values
             WHERE label = ?1
             ORDER BY report_id ASC, idx ASC",
        )?;
        let values = stmt
            .query_map(params![label], |row| row.get(0))?
            .collect::<std::result::Result<Vec<f64>, _>>()?;
        Ok(values)
    }

    /// Check that WAL mode is active (for diagnostics).
    pub fn is_wal_mode(&self) -> bool {
        self.conn
            .lock()
            .query_row("PRAGMA journal_mode", [], |row| row.get::<_, String>(0))
            .map(|mode| mode.eq_ignore_ascii_case("wal"))
            .unwrap_or(false)
    }
}

impl ResultsCollector for SqliteCollector {
    fn collect(&self, report: &ReportLog) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let summary = report.summary.as_ref();
            tx.prepare_cached(
                "INSERT INTO reports (
                    source, stream, created_at,
                    summary_label, summary_value, summary_direction, summary_unit
                ) VALUES (?1,?2,?3,?4,?5,?6,?7)",
            )?
            .execute(params![
                report.source,
                report.stream,
                report.created_at,
                summary.map(|s| s.label.as_str()),
                summary.map(|s| s.value),
                summary.map(|s| s.direction.as_str()),
                summary.map(|s| s.unit.as_str()),
            ])?;
            let report_id = tx.last_insert_rowid();

            let mut insert = tx.prepare_cached(
                "INSERT INTO metric_values (report_id, label, direction, unit, idx, value)
                 VALUES (?1,?2,?3,?4,?5,?6)",
            )?;
            for metric in &report.metrics {
                for (idx, value) in (0_i64..).zip(&metric.values) {
                    insert.execute(params![
                        report_id,
                        metric.label,
                        metric.direction.as_str(),
                        metric.unit.as_str(),
                        idx,
                        value,
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCollector")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

// ──────────────────── schema & pragmas ────────────────────

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        eprintln!("[PCH-SQLITE] WARNING: requested WAL mode but got '{mode}'");
    }
    Ok(())
}

fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            stream TEXT NOT NULL,
            created_at TEXT NOT NULL,
            summary_label TEXT,
            summary_value REAL,
            summary_direction TEXT,
            summary_unit TEXT
        );

        CREATE TABLE IF NOT EXISTS metric_values (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            report_id INTEGER NOT NULL REFERENCES reports(id),
            label TEXT NOT NULL,
            direction TEXT NOT NULL,
            unit TEXT NOT NULL,
            idx INTEGER NOT NULL,
            value REAL NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reports_stream ON reports(source, stream);
        CREATE INDEX IF NOT EXISTS idx_metric_values_label ON metric_values(label);",
    )?;
    Ok(())
}

// ──────────────────── tests ────────────────────
