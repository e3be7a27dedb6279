pub mod cache;
pub mod config;
pub mod identity;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory_store;
pub mod wishlist;
pub mod wishlist_store;
