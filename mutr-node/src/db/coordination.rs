//! Readiness and waiting table statements
//!
//! Every function runs on a caller-supplied connection so the coordinator
//! can group them into one transaction. Nothing here decides policy.

use mutr_common::Result;
use sqlx::{Row, SqliteConnection, SqlitePool};

/// A request row removed from the waiting table
#[derive(Debug, Clone)]
pub struct WaitingRow {
    pub id: i64,
    pub node_id: i64,
    pub request: String,
    pub expires_at: String,
}

/// Register (or re-register) a node as in flight
pub async fn upsert_in_flight(
    conn: &mut SqliteConnection,
    node_id: i64,
    now: &str,
    expires_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO analysis_readiness (node_id, state, updated_at, expires_at)
        VALUES (?, 'in_flight', ?, ?)
        ON CONFLICT(node_id) DO UPDATE SET
            state = 'in_flight',
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(node_id)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Record that a node's analysis completed
pub async fn upsert_ready(
    conn: &mut SqliteConnection,
    node_id: i64,
    now: &str,
    expires_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO analysis_readiness (node_id, state, updated_at, expires_at)
        VALUES (?, 'ready', ?, ?)
        ON CONFLICT(node_id) DO UPDATE SET
            state = 'ready',
            updated_at = excluded.updated_at,
            expires_at = excluded.expires_at
        "#,
    )
    .bind(node_id)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// True if the node holds an unexpired in-flight marker
pub async fn is_in_flight(conn: &mut SqliteConnection, node_id: i64, now: &str) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT 1 FROM analysis_readiness
        WHERE node_id = ? AND state = 'in_flight' AND expires_at > ?
        "#,
    )
    .bind(node_id)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(found.is_some())
}

/// Drop a node's in-flight marker; a ready marker is left alone
pub async fn clear_in_flight(conn: &mut SqliteConnection, node_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM analysis_readiness WHERE node_id = ? AND state = 'in_flight'",
    )
    .bind(node_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Append a held request under its parent
pub async fn push_waiting(
    conn: &mut SqliteConnection,
    parent_id: i64,
    node_id: i64,
    request: &str,
    now: &str,
    expires_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO analysis_waiting (parent_id, node_id, request, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(parent_id)
    .bind(node_id)
    .bind(request)
    .bind(now)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Remove and return every request held under `parent_id`, FIFO
pub async fn drain_waiting(conn: &mut SqliteConnection, parent_id: i64) -> Result<Vec<WaitingRow>> {
    let rows = sqlx::query(
        "DELETE FROM analysis_waiting WHERE parent_id = ? RETURNING id, node_id, request, expires_at",
    )
    .bind(parent_id)
    .fetch_all(&mut *conn)
    .await?;

    // RETURNING order is unspecified
    let mut drained: Vec<WaitingRow> = rows
        .iter()
        .map(|row| WaitingRow {
            id: row.get("id"),
            node_id: row.get("node_id"),
            request: row.get("request"),
            expires_at: row.get("expires_at"),
        })
        .collect();
    drained.sort_by_key(|row| row.id);

    Ok(drained)
}

/// Delete waiting rows whose held node is one of `node_ids`
pub async fn delete_waiting_for_nodes(conn: &mut SqliteConnection, node_ids: &[i64]) -> Result<u64> {
    if node_ids.is_empty() {
        return Ok(0);
    }

    let placeholders = vec!["?"; node_ids.len()].join(", ");
    let sql = format!(
        "DELETE FROM analysis_waiting WHERE node_id IN ({})",
        placeholders
    );

    let mut query = sqlx::query(&sql);
    for node_id in node_ids {
        query = query.bind(*node_id);
    }

    Ok(query.execute(&mut *conn).await?.rows_affected())
}

/// Delete expired readiness markers and waiting rows
pub async fn purge_expired(conn: &mut SqliteConnection, now: &str) -> Result<(u64, u64)> {
    let readiness = sqlx::query("DELETE FROM analysis_readiness WHERE expires_at <= ?")
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let waiting = sqlx::query("DELETE FROM analysis_waiting WHERE expires_at <= ?")
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok((readiness, waiting))
}

/// Node ids currently held under `parent_id`, FIFO
pub async fn waiting_node_ids(pool: &SqlitePool, parent_id: i64) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar(
        "SELECT node_id FROM analysis_waiting WHERE parent_id = ? ORDER BY id ASC",
    )
    .bind(parent_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}

/// Current readiness marker of a node ('in_flight', 'ready' or None)
pub async fn readiness_state(pool: &SqlitePool, node_id: i64) -> Result<Option<String>> {
    let state = sqlx::query_scalar("SELECT state FROM analysis_readiness WHERE node_id = ?")
        .bind(node_id)
        .fetch_optional(pool)
        .await?;

    Ok(state)
}
