//! 存储接口定义

use crate::error::StorageError;
use std::collections::HashMap;

/// 命名空间化的哈希存储：collection → field → value。
///
/// 单次调用视为原子操作；跨 collection 的事务不在此层提供。
#[async_trait::async_trait]
pub trait HashStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StorageError>;

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StorageError>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError>;

    /// 一次写入多个 field。空列表直接返回。
    async fn hset_many(&self, key: &str, fields: &[(String, String)])
    -> Result<(), StorageError>;

    /// 返回 field 是否存在并被删除。
    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StorageError>;
}
