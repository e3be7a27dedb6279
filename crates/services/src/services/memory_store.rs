//! In-process [`WishlistStore`] with fault injection and call holds, for
//! exercising interleavings deterministically.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use strum_macros::Display;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

use super::wishlist_store::{StoreError, WishlistStore};

/// Store operation, used to target injected faults and holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum StoreOp {
    SelectAll,
    Insert,
    DeleteByKey,
    DeleteAllForUser,
}

/// Blocks calls of one [`StoreOp`] until opened
#[derive(Debug, Clone)]
pub struct StoreHold {
    gate: Arc<Semaphore>,
}

impl StoreHold {
    /// Let every waiting and future call through.
    pub fn open(&self) {
        self.gate.close();
    }
}

/// In-process store. Supports one-shot fault injection and holding calls at
/// the suspension point, which makes interleavings reproducible.
#[derive(Debug, Default)]
pub struct MemoryWishlistStore {
    rows: Mutex<HashMap<Uuid, HashSet<String>>>,
    faults: Mutex<HashMap<StoreOp, VecDeque<StoreError>>>,
    holds: Mutex<HashMap<StoreOp, StoreHold>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryWishlistStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `error`. Queued faults fire in order.
    pub fn fail_next(&self, op: StoreOp, error: StoreError) {
        lock(&self.faults).entry(op).or_default().push_back(error);
    }

    /// Hold every subsequent call of `op` until the returned handle is opened.
    pub fn hold(&self, op: StoreOp) -> StoreHold {
        let hold = StoreHold {
            gate: Arc::new(Semaphore::new(0)),
        };
        lock(&self.holds).insert(op, hold.clone());
        hold
    }

    /// Rows currently stored for `user_id`, bypassing faults and holds.
    pub fn rows_for(&self, user_id: Uuid) -> HashSet<String> {
        lock(&self.rows).get(&user_id).cloned().unwrap_or_default()
    }

    async fn enter(&self, op: StoreOp) -> Result<(), StoreError> {
        let hold = lock(&self.holds).get(&op).cloned();
        if let Some(hold) = hold {
            // A closed gate means the hold was opened.
            let _ = hold.gate.acquire().await;
        }

        match lock(&self.faults).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => {
                debug!(op = %op, error = %error, "Memory store: injected fault");
                Err(error)
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl WishlistStore for MemoryWishlistStore {
    async fn select_all(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        self.enter(StoreOp::SelectAll).await?;
        Ok(self.rows_for(user_id).into_iter().collect())
    }

    async fn insert(&self, user_id: Uuid, product_id: &str) -> Result<(), StoreError> {
        self.enter(StoreOp::Insert).await?;
        lock(&self.rows)
            .entry(user_id)
            .or_default()
            .insert(product_id.to_string());
        Ok(())
    }

    async fn delete_by_key(&self, user_id: Uuid, product_id: &str) -> Result<(), StoreError> {
        self.enter(StoreOp::DeleteByKey).await?;
        if let Some(rows) = lock(&self.rows).get_mut(&user_id) {
            rows.remove(product_id);
        }
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.enter(StoreOp::DeleteAllForUser).await?;
        lock(&self.rows).remove(&user_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_memory_store_fault_fires_once() {
        let store = MemoryWishlistStore::new();
        let user_id = Uuid::new_v4();
        store.fail_next(StoreOp::Insert, StoreError::Transport("offline".to_string()));

        assert!(matches!(
            store.insert(user_id, "p1").await,
            Err(StoreError::Transport(_))
        ));
        assert!(store.rows_for(user_id).is_empty());

        store.insert(user_id, "p1").await.unwrap();
        store.insert(user_id, "p1").await.unwrap();
        assert_eq!(store.select_all(user_id).await.unwrap(), vec!["p1".to_string()]);
    }

    #[tokio::test]
    async fn test_memory_store_hold_blocks_until_opened() {
        let store = Arc::new(MemoryWishlistStore::new());
        let user_id = Uuid::new_v4();
        let hold = store.hold(StoreOp::Insert);

        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.insert(user_id, "p1").await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());
        assert!(store.rows_for(user_id).is_empty());

        hold.open();
        pending.await.unwrap().unwrap();
        assert!(store.rows_for(user_id).contains("p1"));
    }
}
