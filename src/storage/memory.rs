use super::Storage;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory [`Storage`]. Lost when dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage<T> {
    items: Mutex<BTreeMap<String, T>>,
}

impl<T> MemoryStorage<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
        }
    }

    fn items(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<T> Storage<T> for MemoryStorage<T>
where
    T: Clone + Send + Sync,
{
    async fn get_item(&self, key: &str) -> Result<Option<T>> {
        Ok(self.items().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: T) -> Result<()> {
        self.items().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.items().clear();
        Ok(())
    }

    async fn key(&self, index: usize) -> Result<Option<String>> {
        Ok(self.items().keys().nth(index).cloned())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.items().len())
    }
}
