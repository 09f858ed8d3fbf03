//! Key-value storage for persisted items such as cached results.
//!
//! [`Storage`] mirrors the shape of a browser-style key-value store:
//! get/set/remove by key, clear, and positional access to keys. Values are
//! typed; implementations decide how they are persisted.

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::Result;
use async_trait::async_trait;

/// A typed key-value store.
#[async_trait]
pub trait Storage<T>: Send + Sync
where
    T: Send + Sync,
{
    /// The value under `key`, if any.
    async fn get_item(&self, key: &str) -> Result<Option<T>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set_item(&self, key: &str, value: T) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove_item(&self, key: &str) -> Result<()>;

    /// Remove every item.
    async fn clear(&self) -> Result<()>;

    /// The `index`-th key in key order.
    async fn key(&self, index: usize) -> Result<Option<String>>;

    /// Number of stored items.
    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
