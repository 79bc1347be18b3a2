//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS limit_event (
    id              TEXT PRIMARY KEY NOT NULL,
    timestamp       TEXT NOT NULL,
    event_type      TEXT NOT NULL CHECK(event_type IN ('THRESHOLD','RATE_LIMIT','RESUMED','MANUAL_PAUSE','MANUAL_RESUME')),
    tier            TEXT NOT NULL,
    usage_snapshot  TEXT NOT NULL,
    reset_time      TEXT
);

CREATE TABLE IF NOT EXISTS usage_record (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id      TEXT NOT NULL,
    agent           TEXT NOT NULL,
    started_at      TEXT NOT NULL,
    ended_at        TEXT,
    status          TEXT NOT NULL CHECK(status IN ('active','completed')),
    units           INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS kv_store (
    key             TEXT PRIMARY KEY NOT NULL,
    value           TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_event_timestamp ON limit_event(timestamp);
CREATE INDEX IF NOT EXISTS idx_usage_session ON usage_record(session_id);
CREATE INDEX IF NOT EXISTS idx_usage_started ON usage_record(started_at);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
