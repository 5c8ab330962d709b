use sqlx::SqlitePool;

use crate::db::models::Wallet;

pub async fn create_wallet(
    pool: &SqlitePool,
    label: &str,
    address: &str,
) -> Result<Wallet, sqlx::Error> {
    sqlx::query_as::<_, Wallet>("INSERT INTO wallets (label, address) VALUES (?, ?) RETURNING *")
        .bind(label.trim())
        .bind(address.trim())
        .fetch_one(pool)
        .await
}

pub async fn list_wallets(pool: &SqlitePool) -> Result<Vec<Wallet>, sqlx::Error> {
    sqlx::query_as::<_, Wallet>("SELECT * FROM wallets ORDER BY label")
        .fetch_all(pool)
        .await
}

/// Resolves a payout address from an optional wallet reference.
pub async fn get_wallet_address(
    pool: &SqlitePool,
    wallet_id: Option<i64>,
) -> Result<Option<String>, sqlx::Error> {
    let Some(wallet_id) = wallet_id else {
        return Ok(None);
    };
    let row: Option<(String,)> = sqlx::query_as("SELECT address FROM wallets WHERE id = ?")
        .bind(wallet_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(address,)| address))
}

/// Deletes a wallet and clears the reference on every node that pointed at
/// it. Nodes themselves are left untouched.
pub async fn delete_wallet(pool: &SqlitePool, wallet_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM wallets WHERE id = ?")
        .bind(wallet_id)
        .execute(pool)
        .await?;
    sqlx::query("UPDATE nodes SET wallet_id = NULL WHERE wallet_id = ?")
        .bind(wallet_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewNode;
    use crate::db::services::node_service;
    use crate::db::test_pool;

    fn node_with_wallet(wallet_id: i64) -> NewNode {
        NewNode {
            host: "203.0.113.20".into(),
            user: "root".into(),
            port: 22,
            use_password: false,
            password: None,
            key_path: Some("/root/.ssh/id_rsa".into()),
            wg_port: 51820,
            api_port: 4050,
            wallet_id: Some(wallet_id),
            payout_address: None,
            capacity_mbps: None,
            tags: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn delete_wallet_nulls_node_references() {
        let pool = test_pool().await;
        let wallet = create_wallet(&pool, "main", "0xabc123").await.unwrap();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let node = node_service::create_node(&pool, &node_with_wallet(wallet.id))
                .await
                .unwrap();
            ids.push(node.id);
        }

        assert_eq!(delete_wallet(&pool, wallet.id).await.unwrap(), 1);

        for id in ids {
            let node = node_service::get_node_by_id(&pool, id).await.unwrap();
            let node = node.expect("node must survive wallet deletion");
            assert_eq!(node.wallet_id, None);
        }
    }

    #[tokio::test]
    async fn address_lookup() {
        let pool = test_pool().await;
        let wallet = create_wallet(&pool, "payout", "0xdeadbeef").await.unwrap();

        assert_eq!(
            get_wallet_address(&pool, Some(wallet.id)).await.unwrap(),
            Some("0xdeadbeef".to_string())
        );
        assert_eq!(get_wallet_address(&pool, None).await.unwrap(), None);
        assert_eq!(get_wallet_address(&pool, Some(999)).await.unwrap(), None);
    }
}
