//! 配置存储仓库
//!
//! 键空间：
//! - `instList`：field = instanceId，value = InstanceConfig JSON
//! - `devAtInst`：field = deviceId，value = DeviceConfig JSON
//! - `<deviceId>`：field = 标签名，value = 寻址字段 JSON 数组

use crate::error::StorageError;
use crate::traits::HashStore;
use domain::{DEVICE_LIST_KEY, DeviceConfig, INSTANCE_LIST_KEY, InstanceConfig, TagBinding};
use std::sync::Arc;
use tracing::warn;

/// 实例/设备/标签配置的只读视图（另附写入方法供外部 API 与测试使用）。
#[derive(Clone)]
pub struct ConfigStore {
    store: Arc<dyn HashStore>,
}

impl ConfigStore {
    pub fn new(store: Arc<dyn HashStore>) -> Self {
        Self { store }
    }

    /// 读取单个实例；记录损坏时返回错误。
    pub async fn load_instance(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceConfig>, StorageError> {
        let Some(raw) = self.store.hget(INSTANCE_LIST_KEY, instance_id).await? else {
            return Ok(None);
        };
        let instance = serde_json::from_str(&raw)?;
        Ok(Some(instance))
    }

    /// 列出全部实例；损坏的记录记日志后跳过。
    pub async fn list_instances(&self) -> Result<Vec<InstanceConfig>, StorageError> {
        let entries = self.store.hgetall(INSTANCE_LIST_KEY).await?;
        let mut instances = Vec::with_capacity(entries.len());
        for (id, raw) in entries {
            match serde_json::from_str::<InstanceConfig>(&raw) {
                Ok(instance) => instances.push(instance),
                Err(err) => warn!(
                    target: "gw.storage",
                    instance_id = %id,
                    error = %err,
                    "instance record skipped"
                ),
            }
        }
        instances.sort_by(|a, b| a.inst_id.cmp(&b.inst_id));
        Ok(instances)
    }

    pub async fn all_devices(&self) -> Result<Vec<DeviceConfig>, StorageError> {
        let entries = self.store.hgetall(DEVICE_LIST_KEY).await?;
        let mut devices = Vec::with_capacity(entries.len());
        for (id, raw) in entries {
            match serde_json::from_str::<DeviceConfig>(&raw) {
                Ok(device) => devices.push(device),
                Err(err) => warn!(
                    target: "gw.storage",
                    device_id = %id,
                    error = %err,
                    "device record skipped"
                ),
            }
        }
        devices.sort_by(|a, b| a.dev_id.cmp(&b.dev_id));
        Ok(devices)
    }

    /// 绑定到指定实例的设备。
    pub async fn devices_for_instance(
        &self,
        instance_id: &str,
    ) -> Result<Vec<DeviceConfig>, StorageError> {
        let devices = self.all_devices().await?;
        Ok(devices
            .into_iter()
            .filter(|device| device.inst_id == instance_id)
            .collect())
    }

    /// 按 ID 读取设备，不存在的 ID 忽略。
    pub async fn devices_by_ids(&self, ids: &[String]) -> Result<Vec<DeviceConfig>, StorageError> {
        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(raw) = self.store.hget(DEVICE_LIST_KEY, id).await? else {
                warn!(target: "gw.storage", device_id = %id, "device not found");
                continue;
            };
            devices.push(serde_json::from_str(&raw)?);
        }
        Ok(devices)
    }

    /// 设备的标签绑定；损坏的条目记日志后跳过，结果按标签名排序。
    pub async fn tags_for_device(&self, device_id: &str) -> Result<Vec<TagBinding>, StorageError> {
        let entries = self.store.hgetall(device_id).await?;
        let mut tags = Vec::with_capacity(entries.len());
        for (name, raw) in entries {
            match TagBinding::from_stored(&name, &raw) {
                Ok(tag) => tags.push(tag),
                Err(err) => warn!(
                    target: "gw.storage",
                    device_id = %device_id,
                    tag = %name,
                    error = %err,
                    "tag binding skipped"
                ),
            }
        }
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    pub async fn save_instance(&self, instance: &InstanceConfig) -> Result<(), StorageError> {
        let raw = serde_json::to_string(instance)?;
        self.store
            .hset(INSTANCE_LIST_KEY, &instance.inst_id, &raw)
            .await
    }

    pub async fn remove_instance(&self, instance_id: &str) -> Result<bool, StorageError> {
        self.store.hdel(INSTANCE_LIST_KEY, instance_id).await
    }

    pub async fn save_device(&self, device: &DeviceConfig) -> Result<(), StorageError> {
        let raw = serde_json::to_string(device)?;
        self.store.hset(DEVICE_LIST_KEY, &device.dev_id, &raw).await
    }

    pub async fn save_tags(&self, device_id: &str, tags: &[TagBinding]) -> Result<(), StorageError> {
        let fields: Vec<(String, String)> = tags
            .iter()
            .map(|tag| (tag.name.clone(), tag.to_stored()))
            .collect();
        self.store.hset_many(device_id, &fields).await
    }
}
