use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;
use uuid::Uuid;

/// One user's affiliation with one product. At most one row exists per
/// (user_id, product_id).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct WishlistItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_id: String,
    pub created_at: DateTime<Utc>,
}

impl WishlistItem {
    /// Insert the (user, product) pair. Returns false when the pair already existed.
    pub async fn create(
        pool: &SqlitePool,
        user_id: Uuid,
        product_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"INSERT INTO wishlist_items (id, user_id, product_id)
               VALUES ($1, $2, $3)
               ON CONFLICT(user_id, product_id) DO NOTHING"#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(product_id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_user_id(
        pool: &SqlitePool,
        user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, WishlistItem>(
            r#"SELECT id, user_id, product_id, created_at
               FROM wishlist_items
               WHERE user_id = $1
               ORDER BY created_at DESC"#,
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    pub async fn find_product_ids_by_user_id(
        pool: &SqlitePool,
        user_id: Uuid,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT product_id FROM wishlist_items WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
    }

    /// Delete the (user, product) pair. Returns the number of rows removed (0 or 1).
    pub async fn delete(
        pool: &SqlitePool,
        user_id: Uuid,
        product_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1 AND product_id = $2")
                .bind(user_id)
                .bind(product_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_for_user(pool: &SqlitePool, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM wishlist_items WHERE user_id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn test_create_is_unique_per_user_and_product() {
        let db = DBService::new("sqlite::memory:").await.unwrap();
        let user_id = Uuid::new_v4();

        assert!(WishlistItem::create(&db.pool, user_id, "p1").await.unwrap());
        assert!(!WishlistItem::create(&db.pool, user_id, "p1").await.unwrap());

        let items = WishlistItem::find_by_user_id(&db.pool, user_id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].product_id, "p1");
        assert_eq!(items[0].user_id, user_id);
    }

    #[tokio::test]
    async fn test_queries_are_partitioned_by_user() {
        let db = DBService::new("sqlite::memory:").await.unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        WishlistItem::create(&db.pool, alice, "p1").await.unwrap();
        WishlistItem::create(&db.pool, alice, "p2").await.unwrap();
        WishlistItem::create(&db.pool, bob, "p1").await.unwrap();

        assert_eq!(WishlistItem::delete(&db.pool, alice, "p1").await.unwrap(), 1);
        assert_eq!(WishlistItem::delete(&db.pool, alice, "p1").await.unwrap(), 0);

        let bob_ids = WishlistItem::find_product_ids_by_user_id(&db.pool, bob)
            .await
            .unwrap();
        assert_eq!(bob_ids, vec!["p1".to_string()]);

        assert_eq!(WishlistItem::delete_all_for_user(&db.pool, alice).await.unwrap(), 1);
        assert!(
            WishlistItem::find_product_ids_by_user_id(&db.pool, alice)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            WishlistItem::find_product_ids_by_user_id(&db.pool, bob)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
