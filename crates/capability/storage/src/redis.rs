//! Redis 哈希存储实现

use crate::error::StorageError;
use crate::traits::HashStore;
use redis::AsyncCommands;
use std::collections::HashMap;

/// Redis 哈希存储（HGET / HGETALL / HSET / HDEL）。
pub struct RedisHashStore {
    client: redis::Client,
}

impl RedisHashStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self::new(client))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StorageError> {
        Ok(self.client.get_multiplexed_tokio_connection().await?)
    }
}

#[async_trait::async_trait]
impl HashStore for RedisHashStore {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StorageError> {
        let mut connection = self.connection().await?;
        let value: Option<String> = connection.hget(key, field).await?;
        Ok(value)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        let mut connection = self.connection().await?;
        let values: HashMap<String, String> = connection.hgetall(key).await?;
        Ok(values)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
        let mut connection = self.connection().await?;
        connection.hset::<_, _, _, ()>(key, field, value).await?;
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
        let mut connection = self.connection().await?;
        connection.hset_multiple::<_, _, _, ()>(key, fields).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StorageError> {
        let mut connection = self.connection().await?;
        let removed: i64 = connection.hdel(key, field).await?;
        Ok(removed > 0)
    }
}
