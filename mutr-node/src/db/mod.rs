//! Database access for mutr-node
//!
//! One SQLite file holds the node store and the coordination tables. Several
//! service instances may share it, so the pool runs in WAL mode with a busy
//! timeout and callers wrap contended writes in `retry_on_lock`.

pub mod coordination;
pub mod nodes;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Connection pool size
const MAX_CONNECTIONS: u32 = 8;

/// Fixed-width UTC timestamp so stored values compare lexically
pub fn to_db_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp written by `to_db_timestamp`
pub fn parse_db_timestamp(value: &str) -> mutr_common::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| mutr_common::Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Initialize database connection pool and create tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create node and coordination tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER REFERENCES nodes(id),
            root_id INTEGER NOT NULL,
            content TEXT NOT NULL,
            topic TEXT,
            mutation_filter TEXT NOT NULL DEFAULT 'ORIGIN',
            mutation_score REAL NOT NULL DEFAULT 0.0,
            emotion TEXT NOT NULL DEFAULT 'neutral',
            confidence REAL,
            analysis_status TEXT NOT NULL DEFAULT 'PENDING',
            last_error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_root ON nodes(root_id, id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(analysis_status, id)")
        .execute(pool)
        .await?;

    // state: 'in_flight' while a node's analysis is registered, 'ready' once completed
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_readiness (
            node_id INTEGER PRIMARY KEY,
            state TEXT NOT NULL CHECK (state IN ('in_flight', 'ready')),
            updated_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_waiting (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER NOT NULL,
            node_id INTEGER NOT NULL,
            request TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_waiting_parent ON analysis_waiting(parent_id, id)")
        .execute(pool)
        .await?;

    tracing::info!("Database tables initialized (nodes, analysis_readiness, analysis_waiting)");

    Ok(())
}
