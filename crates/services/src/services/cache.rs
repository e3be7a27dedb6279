//! Per-user local copy of the wishlist, used to seed state before the remote fetch lands.

use std::{
    collections::HashSet,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Storage key of the persisted wishlist, kept from the web storefront
pub const WISHLIST_CACHE_KEY: &str = "affiliate_marketplace_wishlist";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait WishlistCache: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<Option<HashSet<String>>, CacheError>;

    async fn save(&self, user_id: Uuid, entries: &HashSet<String>) -> Result<(), CacheError>;

    async fn remove(&self, user_id: Uuid) -> Result<(), CacheError>;
}

/// One JSON array of product ids per user in a directory
#[derive(Debug, Clone)]
pub struct FileWishlistCache {
    dir: PathBuf,
}

impl FileWishlistCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: Uuid) -> PathBuf {
        self.dir
            .join(format!("{}-{}.json", WISHLIST_CACHE_KEY, user_id))
    }
}

#[async_trait]
impl WishlistCache for FileWishlistCache {
    async fn load(&self, user_id: Uuid) -> Result<Option<HashSet<String>>, CacheError> {
        let contents = match fs::read_to_string(self.path_for(user_id)).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let ids: Vec<String> = serde_json::from_str(&contents)?;
        Ok(Some(ids.into_iter().collect()))
    }

    async fn save(&self, user_id: Uuid, entries: &HashSet<String>) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).await?;

        let mut ids: Vec<&String> = entries.iter().collect();
        ids.sort();

        // Readers only ever see a complete file.
        let path = self.path_for(user_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&ids)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, user_id: Uuid) -> Result<(), CacheError> {
        match fs::remove_file(self.path_for(user_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileWishlistCache::new(dir.path());

        assert!(cache.load(Uuid::new_v4()).await.unwrap().is_none());
        cache.remove(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_save_is_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileWishlistCache::new(dir.path().join("nested"));
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let entries: HashSet<String> = ["p2", "p1"].iter().map(|s| s.to_string()).collect();

        cache.save(alice, &entries).await.unwrap();

        assert_eq!(cache.load(alice).await.unwrap(), Some(entries));
        assert!(cache.load(bob).await.unwrap().is_none());

        let raw = std::fs::read_to_string(cache.path_for(alice)).unwrap();
        assert_eq!(raw, r#"["p1","p2"]"#);

        cache.remove(alice).await.unwrap();
        assert!(cache.load(alice).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileWishlistCache::new(dir.path());
        let user_id = Uuid::new_v4();
        std::fs::write(cache.path_for(user_id), "not json").unwrap();

        assert!(matches!(cache.load(user_id).await, Err(CacheError::Serde(_))));
    }
}
