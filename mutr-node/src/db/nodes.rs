//! Node store operations
//!
//! Status transitions are conditional updates: the WHERE clause names the
//! allowed source states and a zero row count is reported as
//! `Error::InvalidState`. Callers never read-then-write a status.

use chrono::Utc;
use mutr_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{parse_db_timestamp, to_db_timestamp};
use crate::models::{
    AnalysisContext, AnalysisResult, AnalysisStatus, Emotion, MutationFilter, Node,
};

const NODE_COLUMNS: &str = "id, parent_id, root_id, content, topic, mutation_filter, \
    mutation_score, emotion, confidence, analysis_status, last_error, created_at, updated_at";

fn row_to_node(row: &SqliteRow) -> Result<Node> {
    let status: String = row.get("analysis_status");
    let analysis_status = status
        .parse::<AnalysisStatus>()
        .map_err(Error::Internal)?;

    let mutation_filter: String = row.get("mutation_filter");
    let emotion: String = row.get("emotion");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Node {
        id: row.get("id"),
        parent_id: row.get("parent_id"),
        root_id: row.get("root_id"),
        content: row.get("content"),
        topic: row.get("topic"),
        mutation_filter: MutationFilter::parse(&mutation_filter),
        mutation_score: row.get("mutation_score"),
        emotion: Emotion::parse(&emotion),
        confidence: row.get("confidence"),
        analysis_status,
        last_error: row.get("last_error"),
        created_at: parse_db_timestamp(&created_at)?,
        updated_at: parse_db_timestamp(&updated_at)?,
    })
}

/// Insert a node; `root_id` is derived in the same transaction
///
/// Returns `Error::NotFound` when `parent_id` names a missing node.
pub async fn insert_node(
    pool: &SqlitePool,
    parent_id: Option<i64>,
    content: &str,
) -> Result<Node> {
    let now = to_db_timestamp(Utc::now());
    let mut tx = pool.begin().await?;

    let node_id = match parent_id {
        Some(parent_id) => {
            // INSERT ... SELECT copies the parent's root and inserts nothing if the parent is gone
            let result = sqlx::query(
                r#"
                INSERT INTO nodes (parent_id, root_id, content, created_at, updated_at)
                SELECT id, root_id, ?, ?, ? FROM nodes WHERE id = ?
                "#,
            )
            .bind(content)
            .bind(&now)
            .bind(&now)
            .bind(parent_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(Error::NotFound(format!("Parent node {} not found", parent_id)));
            }
            result.last_insert_rowid()
        }
        None => {
            let result = sqlx::query(
                r#"
                INSERT INTO nodes (parent_id, root_id, content, created_at, updated_at)
                VALUES (NULL, 0, ?, ?, ?)
                "#,
            )
            .bind(content)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            let node_id = result.last_insert_rowid();
            sqlx::query("UPDATE nodes SET root_id = id WHERE id = ?")
                .bind(node_id)
                .execute(&mut *tx)
                .await?;
            node_id
        }
    };

    let row = sqlx::query(&format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS))
        .bind(node_id)
        .fetch_one(&mut *tx)
        .await?;
    let node = row_to_node(&row)?;

    tx.commit().await?;

    Ok(node)
}

/// Load a node by id
pub async fn find_by_id(pool: &SqlitePool, node_id: i64) -> Result<Option<Node>> {
    let row = sqlx::query(&format!("SELECT {} FROM nodes WHERE id = ?", NODE_COLUMNS))
        .bind(node_id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_node).transpose()
}

/// Load a node by id, `Error::NotFound` if absent
pub async fn get_node(pool: &SqlitePool, node_id: i64) -> Result<Node> {
    find_by_id(pool, node_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Node {} not found", node_id)))
}

/// Persisted topic of a node (None if the node is missing or unclassified)
pub async fn find_topic(pool: &SqlitePool, node_id: i64) -> Result<Option<String>> {
    let topic: Option<Option<String>> = sqlx::query_scalar("SELECT topic FROM nodes WHERE id = ?")
        .bind(node_id)
        .fetch_optional(pool)
        .await?;

    Ok(topic.flatten())
}

/// All nodes of a lineage in creation order
pub async fn find_by_root(pool: &SqlitePool, root_id: i64) -> Result<Vec<Node>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM nodes WHERE root_id = ? ORDER BY id ASC",
        NODE_COLUMNS
    ))
    .bind(root_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_node).collect()
}

/// Nodes of a lineage whose content contains `keyword`, creation order
pub async fn search_galaxy(pool: &SqlitePool, root_id: i64, keyword: &str) -> Result<Vec<Node>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM nodes WHERE root_id = ? AND content LIKE '%' || ? || '%' ORDER BY id ASC",
        NODE_COLUMNS
    ))
    .bind(root_id)
    .bind(keyword)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_node).collect()
}

/// Nodes in any of `statuses`, ascending creation order
///
/// Ids are AUTOINCREMENT, so id order is creation order and every parent
/// precedes its children.
pub async fn find_unfinished(
    pool: &SqlitePool,
    statuses: &[AnalysisStatus],
) -> Result<Vec<Node>> {
    if statuses.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT {} FROM nodes WHERE analysis_status IN ({}) ORDER BY id ASC",
        NODE_COLUMNS, placeholders
    );

    let mut query = sqlx::query(&sql);
    for status in statuses {
        query = query.bind(status.as_str());
    }

    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_node).collect()
}

async fn transition(
    conn: &mut SqliteConnection,
    node_id: i64,
    from: &[AnalysisStatus],
    to: AnalysisStatus,
    last_error: Option<&str>,
) -> Result<()> {
    let placeholders = vec!["?"; from.len()].join(", ");
    let sql = format!(
        "UPDATE nodes SET analysis_status = ?, last_error = ?, updated_at = ? \
         WHERE id = ? AND analysis_status IN ({})",
        placeholders
    );

    let mut query = sqlx::query(&sql)
        .bind(to.as_str())
        .bind(last_error)
        .bind(to_db_timestamp(Utc::now()))
        .bind(node_id);
    for status in from {
        query = query.bind(status.as_str());
    }

    let result = query.execute(&mut *conn).await?;
    if result.rows_affected() == 1 {
        return Ok(());
    }

    let current: Option<String> = sqlx::query_scalar("SELECT analysis_status FROM nodes WHERE id = ?")
        .bind(node_id)
        .fetch_optional(&mut *conn)
        .await?;

    match current {
        None => Err(Error::NotFound(format!("Node {} not found", node_id))),
        Some(current) => Err(Error::InvalidState(format!(
            "Node {} cannot move {} -> {}",
            node_id, current, to
        ))),
    }
}

/// PENDING → PROCESSING
pub async fn begin_analysis(pool: &SqlitePool, node_id: i64) -> Result<()> {
    let mut conn = pool.acquire().await?;
    transition(
        &mut conn,
        node_id,
        &[AnalysisStatus::Pending],
        AnalysisStatus::Processing,
        None,
    )
    .await
}

/// PROCESSING → COMPLETED with the engine result applied
///
/// Takes a connection so the caller can commit the readiness marker in the
/// same transaction.
pub async fn complete_analysis(
    conn: &mut SqliteConnection,
    node_id: i64,
    result: &AnalysisResult,
) -> Result<()> {
    let filter = MutationFilter::from_score(result.mutation_score);
    let emotion = Emotion::parse(&result.emotion);

    let updated = sqlx::query(
        r#"
        UPDATE nodes
        SET topic = ?, mutation_filter = ?, mutation_score = ?, emotion = ?,
            confidence = ?, analysis_status = 'COMPLETED', last_error = NULL, updated_at = ?
        WHERE id = ? AND analysis_status = 'PROCESSING'
        "#,
    )
    .bind(&result.topic)
    .bind(filter.as_str())
    .bind(result.mutation_score)
    .bind(emotion.as_str())
    .bind(result.confidence)
    .bind(to_db_timestamp(Utc::now()))
    .bind(node_id)
    .execute(&mut *conn)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(Error::InvalidState(format!(
            "Node {} is not PROCESSING, cannot complete",
            node_id
        )));
    }

    Ok(())
}

/// PROCESSING → FAILED, recording the cause
pub async fn fail_analysis(pool: &SqlitePool, node_id: i64, error: &str) -> Result<()> {
    let mut conn = pool.acquire().await?;
    transition(
        &mut conn,
        node_id,
        &[AnalysisStatus::Processing],
        AnalysisStatus::Failed,
        Some(error),
    )
    .await
}

/// FAILED/COMPLETED → PENDING (explicit retry)
pub async fn retry_analysis(pool: &SqlitePool, node_id: i64) -> Result<()> {
    let mut conn = pool.acquire().await?;
    transition(
        &mut conn,
        node_id,
        &AnalysisStatus::RETRYABLE,
        AnalysisStatus::Pending,
        None,
    )
    .await
}

/// PROCESSING → PENDING for work abandoned by a crashed process
pub async fn reset_abandoned(pool: &SqlitePool, node_id: i64) -> Result<()> {
    let mut conn = pool.acquire().await?;
    transition(
        &mut conn,
        node_id,
        &[AnalysisStatus::Processing],
        AnalysisStatus::Pending,
        None,
    )
    .await
}

/// Ancestor context for a node's classification
///
/// Walks up from the node's parent collecting content until the collected
/// length reaches `cutoff_chars` (the ancestor that crosses the cutoff is
/// included). `full_context` joins the collected contents oldest first;
/// `baseline_topic` is the topic of the furthest collected ancestor.
pub async fn find_analysis_context(
    pool: &SqlitePool,
    node_id: i64,
    cutoff_chars: usize,
) -> Result<AnalysisContext> {
    let rows = sqlx::query(
        r#"
        WITH RECURSIVE ancestors(id, parent_id, content, topic, depth, total) AS (
            SELECT p.id, p.parent_id, p.content, p.topic, 1, length(p.content)
            FROM nodes c JOIN nodes p ON p.id = c.parent_id
            WHERE c.id = ?
            UNION ALL
            SELECT n.id, n.parent_id, n.content, n.topic, a.depth + 1, a.total + length(n.content)
            FROM nodes n JOIN ancestors a ON n.id = a.parent_id
            WHERE a.total < ?
        )
        SELECT content, topic FROM ancestors ORDER BY depth DESC
        "#,
    )
    .bind(node_id)
    .bind(cutoff_chars as i64)
    .fetch_all(pool)
    .await?;

    let baseline_topic = rows
        .first()
        .and_then(|row| row.get::<Option<String>, _>("topic"))
        .unwrap_or_default();

    let full_context = rows
        .iter()
        .map(|row| row.get::<String, _>("content"))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(AnalysisContext {
        full_context,
        baseline_topic,
    })
}
