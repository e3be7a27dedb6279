//! Remote persistence of wishlist membership rows, partitioned by user.

use async_trait::async_trait;
use db::models::wishlist_item::WishlistItem;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("network error: {0}")]
    Transport(String),
    #[error("rejected by backend: {0}")]
    Rejected(String),
    #[error("timeout")]
    Timeout,
}

/// Collection of (user, product) rows. Every call is scoped to a single user.
///
/// `insert` of an existing pair and `delete_by_key` of a missing pair both
/// succeed, so a stale local view never turns into a spurious failure.
#[async_trait]
pub trait WishlistStore: Send + Sync {
    async fn select_all(&self, user_id: Uuid) -> Result<Vec<String>, StoreError>;

    async fn insert(&self, user_id: Uuid, product_id: &str) -> Result<(), StoreError>;

    async fn delete_by_key(&self, user_id: Uuid, product_id: &str) -> Result<(), StoreError>;

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), StoreError>;
}

/// Store backed by the `wishlist_items` table
#[derive(Clone)]
pub struct SqliteWishlistStore {
    pool: SqlitePool,
}

impl SqliteWishlistStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WishlistStore for SqliteWishlistStore {
    async fn select_all(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(WishlistItem::find_product_ids_by_user_id(&self.pool, user_id).await?)
    }

    async fn insert(&self, user_id: Uuid, product_id: &str) -> Result<(), StoreError> {
        let created = WishlistItem::create(&self.pool, user_id, product_id).await?;
        if !created {
            debug!(user_id = %user_id, product_id, "Wishlist store: row already present");
        }
        Ok(())
    }

    async fn delete_by_key(&self, user_id: Uuid, product_id: &str) -> Result<(), StoreError> {
        WishlistItem::delete(&self.pool, user_id, product_id).await?;
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        let removed = WishlistItem::delete_all_for_user(&self.pool, user_id).await?;
        debug!(user_id = %user_id, removed, "Wishlist store: cleared");
        Ok(())
    }
}
