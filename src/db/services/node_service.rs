use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::{NewNode, Node};

/// Registers a node. Connection fields are never updated in place afterwards;
/// only collection and deploy cycles touch the row.
pub async fn create_node(pool: &SqlitePool, input: &NewNode) -> Result<Node, sqlx::Error> {
    let now = Utc::now().to_rfc3339();
    sqlx::query_as::<_, Node>(
        r#"INSERT INTO nodes
            (host, user, port, use_password, password, key_path, wg_port, api_port,
             wallet_id, payout_address, capacity_mbps, tags, notes, created_at, last_seen, last_metrics)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, NULL)
           RETURNING *"#,
    )
    .bind(&input.host)
    .bind(&input.user)
    .bind(input.port)
    .bind(input.use_password)
    .bind(&input.password)
    .bind(&input.key_path)
    .bind(input.wg_port)
    .bind(input.api_port)
    .bind(input.wallet_id)
    .bind(&input.payout_address)
    .bind(input.capacity_mbps)
    .bind(&input.tags)
    .bind(&input.notes)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub async fn get_node_by_id(pool: &SqlitePool, node_id: i64) -> Result<Option<Node>, sqlx::Error> {
    sqlx::query_as::<_, Node>("SELECT * FROM nodes WHERE id = ?")
        .bind(node_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_nodes(pool: &SqlitePool) -> Result<Vec<Node>, sqlx::Error> {
    sqlx::query_as::<_, Node>("SELECT * FROM nodes ORDER BY id DESC")
        .fetch_all(pool)
        .await
}

pub async fn list_node_ids(pool: &SqlitePool) -> Result<Vec<i64>, sqlx::Error> {
    let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM nodes ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

pub async fn delete_node(pool: &SqlitePool, node_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM nodes WHERE id = ?")
        .bind(node_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Stamps `last_seen` and replaces the raw metrics blob. Last writer wins.
pub async fn update_last_metrics(
    pool: &SqlitePool,
    node_id: i64,
    seen_at: &str,
    metrics: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE nodes SET last_seen = ?, last_metrics = ? WHERE id = ?")
        .bind(seen_at)
        .bind(metrics.to_string())
        .bind(node_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Used by JSON import: restores a full row including history fields.
pub async fn insert_node_row(pool: &SqlitePool, node: &Node) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO nodes
            (host, user, port, use_password, password, key_path, wg_port, api_port,
             wallet_id, payout_address, capacity_mbps, tags, notes, created_at, last_seen, last_metrics)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&node.host)
    .bind(&node.user)
    .bind(node.port)
    .bind(node.use_password)
    .bind(&node.password)
    .bind(&node.key_path)
    .bind(node.wg_port)
    .bind(node.api_port)
    .bind(node.wallet_id)
    .bind(&node.payout_address)
    .bind(node.capacity_mbps)
    .bind(&node.tags)
    .bind(&node.notes)
    .bind(&node.created_at)
    .bind(&node.last_seen)
    .bind(&node.last_metrics)
    .execute(pool)
    .await?;
    Ok(())
}
