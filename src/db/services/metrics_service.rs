use sqlx::SqlitePool;

use crate::db::models::MetricsSample;

/// Appends one history row. Samples are never updated after insertion.
pub async fn insert_sample(
    pool: &SqlitePool,
    node_id: i64,
    ts: &str,
    sessions: i64,
    bytes_total: i64,
    api_ok: bool,
    nat_type: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO metrics (node_id, ts, sessions, bytes_total, api_ok, nat_type)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(node_id)
    .bind(ts)
    .bind(sessions)
    .bind(bytes_total)
    .bind(api_ok)
    .bind(nat_type)
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest first, for history charts.
pub async fn list_samples_for_node(
    pool: &SqlitePool,
    node_id: i64,
    limit: i64,
) -> Result<Vec<MetricsSample>, sqlx::Error> {
    sqlx::query_as::<_, MetricsSample>(
        "SELECT * FROM metrics WHERE node_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(node_id)
    .bind(limit)
    .fetch_all(pool)
    .await
}
