//! 实时存储仓库
//!
//! 键空间：collection = deviceId，field = 标签名，
//! value = `[formattedTimestamp, typedValue, epochMillis]`。

use crate::error::StorageError;
use crate::traits::HashStore;
use domain::{DeviceSamples, Sample, Snapshot};
use std::sync::Arc;
use tracing::warn;

/// 最新值缓存，后写覆盖，不保留历史。
#[derive(Clone)]
pub struct RuntimeStore {
    store: Arc<dyn HashStore>,
}

impl RuntimeStore {
    pub fn new(store: Arc<dyn HashStore>) -> Self {
        Self { store }
    }

    /// 一个设备一个周期的全部采样，一次批量写入。
    pub async fn write_samples(
        &self,
        device_id: &str,
        samples: &[(String, Sample)],
    ) -> Result<(), StorageError> {
        let fields: Vec<(String, String)> = samples
            .iter()
            .map(|(tag, sample)| (tag.clone(), sample.to_json()))
            .collect();
        self.store.hset_many(device_id, &fields).await
    }

    pub async fn read_sample(
        &self,
        device_id: &str,
        tag: &str,
    ) -> Result<Option<Sample>, StorageError> {
        let Some(raw) = self.store.hget(device_id, tag).await? else {
            return Ok(None);
        };
        Ok(Some(Sample::from_json(&raw)?))
    }

    /// 读取设备的全部采样；无法解码的条目跳过。
    pub async fn read_device(&self, device_id: &str) -> Result<DeviceSamples, StorageError> {
        let entries = self.store.hgetall(device_id).await?;
        let mut samples = DeviceSamples::new();
        for (tag, raw) in entries {
            match Sample::from_json(&raw) {
                Ok(sample) => {
                    samples.insert(tag, sample);
                }
                Err(err) => warn!(
                    target: "gw.storage",
                    device_id = %device_id,
                    tag = %tag,
                    error = %err,
                    "runtime sample skipped"
                ),
            }
        }
        Ok(samples)
    }

    /// 多设备快照，没有任何采样的设备不出现在结果中。
    pub async fn read_snapshot(&self, device_ids: &[String]) -> Result<Snapshot, StorageError> {
        let mut snapshot = Snapshot::new();
        for device_id in device_ids {
            let samples = self.read_device(device_id).await?;
            if !samples.is_empty() {
                snapshot.insert(device_id.clone(), samples);
            }
        }
        Ok(snapshot)
    }
}
