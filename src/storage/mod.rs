//! Persistence: the SQLite ledger (incidents, check history) and the JSON
//! baseline document.

pub mod schema;
pub mod snapshot;

use anyhow::{Context, Result};
use chrono::Utc;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: impl AsRef<Path>) -> Result<Pool> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create database directory {}", dir.display()))?;
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Summary of one completed check, as stored in `check_runs`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckRun {
    pub mode: String,
    pub target: String,
    pub outcome: String,
    pub rows: usize,
    pub failing_rows: usize,
    pub anomalies: usize,
}

/// Save a check summary to the database.
pub fn save_check_run(pool: &Pool, run: &CheckRun) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO check_runs (mode, target, outcome, row_count, failing_rows, anomalies, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            run.mode,
            run.target,
            run.outcome,
            run.rows as i64,
            run.failing_rows as i64,
            run.anomalies as i64,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Most recent check summaries, newest first.
pub fn recent_check_runs(pool: &Pool, limit: usize) -> Result<Vec<CheckRun>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT mode, target, outcome, row_count, failing_rows, anomalies FROM check_runs
         ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit as i64], |row| {
        Ok(CheckRun {
            mode: row.get(0)?,
            target: row.get(1)?,
            outcome: row.get(2)?,
            rows: row.get::<_, i64>(3)? as usize,
            failing_rows: row.get::<_, i64>(4)? as usize,
            anomalies: row.get::<_, i64>(5)? as usize,
        })
    })?;

    let mut list = Vec::new();
    for r in rows {
        list.push(r?);
    }
    Ok(list)
}
