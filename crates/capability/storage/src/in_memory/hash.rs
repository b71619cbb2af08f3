//! 哈希存储内存实现
//!
//! 用于本地运行（`GW_STORE=memory`）和测试。

use crate::error::StorageError;
use crate::traits::HashStore;
use std::collections::HashMap;
use std::sync::RwLock;

type Collections = HashMap<String, HashMap<String, String>>;

/// 哈希存储内存实现
#[derive(Default)]
pub struct InMemoryHashStore {
    collections: RwLock<Collections>,
}

impl InMemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// collection 数量（用于测试）
    pub fn len(&self) -> usize {
        self.collections.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl HashStore for InMemoryHashStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StorageError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(collections
            .get(key)
            .and_then(|fields| fields.get(field))
            .cloned())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(collections.get(key).cloned().unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        collections
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_many(
        &self,
        key: &str,
        fields: &[(String, String)],
    ) -> Result<(), StorageError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let entry = collections.entry(key.to_string()).or_default();
        for (field, value) in fields {
            entry.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StorageError> {
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(fields) = collections.get_mut(key) else {
            return Ok(false);
        };
        let removed = fields.remove(field).is_some();
        if fields.is_empty() {
            collections.remove(key);
        }
        Ok(removed)
    }
}
