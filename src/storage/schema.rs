//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            severity TEXT NOT NULL,
            verdict TEXT NOT NULL,
            evidence_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS check_runs (
            id INTEGER PRIMARY KEY,
            mode TEXT NOT NULL,
            target TEXT NOT NULL,
            outcome TEXT NOT NULL,
            row_count INTEGER NOT NULL DEFAULT 0,
            failing_rows INTEGER NOT NULL DEFAULT 0,
            anomalies INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_incidents_created ON incidents(created_at);
        CREATE INDEX IF NOT EXISTS idx_check_runs_target ON check_runs(mode, target);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
