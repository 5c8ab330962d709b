use sqlx::SqlitePool;

use crate::db::models::AclRule;

pub async fn create_rule(
    pool: &SqlitePool,
    port: i64,
    proto: &str,
    cidr: &str,
) -> Result<AclRule, sqlx::Error> {
    sqlx::query_as::<_, AclRule>(
        "INSERT INTO acl (port, proto, cidr, enabled) VALUES (?, ?, ?, 1) RETURNING *",
    )
    .bind(port)
    .bind(proto)
    .bind(cidr)
    .fetch_one(pool)
    .await
}

pub async fn list_rules(pool: &SqlitePool) -> Result<Vec<AclRule>, sqlx::Error> {
    sqlx::query_as::<_, AclRule>("SELECT * FROM acl ORDER BY port, id")
        .fetch_all(pool)
        .await
}

/// Only enabled rows feed the reconciler's desired set.
pub async fn list_enabled_rules(pool: &SqlitePool) -> Result<Vec<AclRule>, sqlx::Error> {
    sqlx::query_as::<_, AclRule>("SELECT * FROM acl WHERE enabled = 1 ORDER BY port, id")
        .fetch_all(pool)
        .await
}

/// Flips the enabled flag, returning the new value. `None` if the row does
/// not exist.
pub async fn toggle_rule(pool: &SqlitePool, rule_id: i64) -> Result<Option<bool>, sqlx::Error> {
    let row: Option<(bool,)> = sqlx::query_as("SELECT enabled FROM acl WHERE id = ?")
        .bind(rule_id)
        .fetch_optional(pool)
        .await?;
    let Some((enabled,)) = row else {
        return Ok(None);
    };
    let flipped = !enabled;
    sqlx::query("UPDATE acl SET enabled = ? WHERE id = ?")
        .bind(flipped)
        .bind(rule_id)
        .execute(pool)
        .await?;
    Ok(Some(flipped))
}

/// Used by JSON import: restores a row with its enabled flag intact.
pub async fn insert_rule_row(pool: &SqlitePool, rule: &AclRule) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO acl (port, proto, cidr, enabled) VALUES (?, ?, ?, ?)")
        .bind(rule.port)
        .bind(&rule.proto)
        .bind(&rule.cidr)
        .bind(rule.enabled)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_rule(pool: &SqlitePool, rule_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM acl WHERE id = ?")
        .bind(rule_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[tokio::test]
    async fn toggle_flips_and_filters_enabled() {
        let pool = test_pool().await;
        let a = create_rule(&pool, 8080, "tcp", "10.0.0.0/8").await.unwrap();
        let b = create_rule(&pool, 53, "udp", "0.0.0.0/0").await.unwrap();
        assert!(a.enabled && b.enabled);

        assert_eq!(toggle_rule(&pool, a.id).await.unwrap(), Some(false));
        let enabled = list_enabled_rules(&pool).await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, b.id);

        assert_eq!(toggle_rule(&pool, a.id).await.unwrap(), Some(true));
        assert_eq!(list_enabled_rules(&pool).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn toggle_unknown_rule_is_none() {
        let pool = test_pool().await;
        assert_eq!(toggle_rule(&pool, 7).await.unwrap(), None);
    }
}
