//! 适配器公共契约：配置解析、设备/标签绑定、带重试的连接、批量写入实时存储。

use crate::backpressure::BackpressurePolicy;
use crate::shutdown::CancelToken;
use domain::{DeviceConfig, InstanceConfig, Sample, TagBinding, TagDataType};
use gw_storage::{ConfigStore, RuntimeStore, StorageError};
use gw_telemetry::{record_connect_retry, record_samples_written, record_store_write_failure};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// 适配器错误分类。
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// 实例/设备配置缺失或类型错误：适配器不进入主循环直接退出。
    #[error("config error: {0}")]
    Config(String),
    /// 端点不可达：按固定间隔重试直到取消。
    #[error("connect error: {0}")]
    Connect(String),
    /// 存储中的 JSON 或协议载荷无法解析：跳过当前条目。
    #[error("decode error: {0}")]
    Decode(String),
    /// Sink 写入失败：丢弃当前条目。
    #[error("delivery error: {0}")]
    Delivery(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// 适配器运行参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterSettings {
    /// 连接失败后的固定重试间隔。
    pub reconnect_delay: Duration,
    /// 轮询型适配器的默认采集周期。
    pub poll_interval: Duration,
    pub backpressure: BackpressurePolicy,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            backpressure: BackpressurePolicy::default(),
        }
    }
}

/// 设备及其标签。
#[derive(Debug, Clone)]
pub struct DeviceBinding {
    pub device: DeviceConfig,
    pub tags: Vec<TagBinding>,
}

/// 驱动侧条目 ID 指向的标签。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundTag {
    pub device_id: String,
    pub tag_name: String,
    pub data_type: TagDataType,
}

/// 协议原生条目 ID → (设备, 标签) 的反向索引。
#[derive(Debug, Clone, Default)]
pub struct ItemIndex {
    by_item: HashMap<String, BoundTag>,
    order: Vec<String>,
}

impl ItemIndex {
    /// 以标签第一个寻址字段作为条目 ID 建立索引；无法识别的标签记日志后跳过。
    pub fn from_bindings(bindings: &[DeviceBinding]) -> Self {
        let mut index = Self::default();
        for binding in bindings {
            for tag in &binding.tags {
                let item_id = tag.addressing().first().and_then(Value::as_str);
                let (Some(item_id), Ok(data_type)) = (item_id, tag.declared_type()) else {
                    warn!(
                        target: "gw.adapter",
                        device_id = %binding.device.dev_id,
                        tag = %tag.name,
                        "tag has no item id or declared type, skipped"
                    );
                    continue;
                };
                index.insert(
                    item_id,
                    BoundTag {
                        device_id: binding.device.dev_id.clone(),
                        tag_name: tag.name.clone(),
                        data_type,
                    },
                );
            }
        }
        index
    }

    pub fn insert(&mut self, item_id: impl Into<String>, tag: BoundTag) {
        let item_id = item_id.into();
        if self.by_item.insert(item_id.clone(), tag).is_none() {
            self.order.push(item_id);
        }
    }

    pub fn get(&self, item_id: &str) -> Option<&BoundTag> {
        self.by_item.get(item_id)
    }

    /// 按插入顺序列出条目 ID。
    pub fn item_ids(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// 一个周期内按设备分组的待写采样。
pub type DeviceBatches = BTreeMap<String, Vec<(String, Sample)>>;

/// 单个实例的运行上下文，由注册表在启动时构造。
#[derive(Clone)]
pub struct AdapterContext {
    pub instance_id: String,
    pub config_store: ConfigStore,
    pub runtime_store: RuntimeStore,
    pub cancel: CancelToken,
    pub settings: AdapterSettings,
}

impl AdapterContext {
    pub async fn load_instance(&self) -> Result<InstanceConfig, AdapterError> {
        self.config_store
            .load_instance(&self.instance_id)
            .await
            .map_err(|err| AdapterError::Config(format!("instance record unreadable: {}", err)))?
            .ok_or_else(|| AdapterError::Config(format!("instance {} not found", self.instance_id)))
    }

    /// 读取实例记录并解码其私有配置。
    pub async fn load_config<C: DeserializeOwned>(&self) -> Result<C, AdapterError> {
        let instance = self.load_instance().await?;
        decode_config(&instance.config)
    }

    /// 绑定到本实例的设备与标签；没有设备或没有任何标签都视为配置错误。
    pub async fn resolve_bindings(&self) -> Result<Vec<DeviceBinding>, AdapterError> {
        let devices = self
            .config_store
            .devices_for_instance(&self.instance_id)
            .await?;
        if devices.is_empty() {
            return Err(AdapterError::Config(format!(
                "no device bound to {}",
                self.instance_id
            )));
        }
        let mut bindings = Vec::with_capacity(devices.len());
        for device in devices {
            let tags = self.config_store.tags_for_device(&device.dev_id).await?;
            bindings.push(DeviceBinding { device, tags });
        }
        if bindings.iter().all(|binding| binding.tags.is_empty()) {
            return Err(AdapterError::Config(format!(
                "no tag bound to {}",
                self.instance_id
            )));
        }
        Ok(bindings)
    }

    /// 每个设备一次批量写入；单个设备写入失败记日志后继续。
    pub async fn deliver(&self, batches: DeviceBatches) -> usize {
        let mut written = 0;
        for (device_id, samples) in batches {
            if samples.is_empty() {
                continue;
            }
            match self.runtime_store.write_samples(&device_id, &samples).await {
                Ok(()) => {
                    written += samples.len();
                    record_samples_written(samples.len() as u64);
                }
                Err(err) => {
                    record_store_write_failure();
                    warn!(
                        target: "gw.adapter",
                        instance_id = %self.instance_id,
                        device_id = %device_id,
                        error = %err,
                        "runtime store write failed"
                    );
                }
            }
        }
        written
    }
}

/// 解码适配器私有配置；接受对象、JSON 字符串或空值（按空对象处理）。
pub fn decode_config<C: DeserializeOwned>(raw: &Value) -> Result<C, AdapterError> {
    let decoded = match raw {
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        Value::String(text) if text.trim().is_empty() => {
            serde_json::from_value(Value::Object(Default::default()))
        }
        Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    };
    decoded.map_err(|err| AdapterError::Config(err.to_string()))
}

/// 连接直到成功或被取消，失败间隔固定为 `delay`。取消时返回 `None`。
pub async fn connect_with_retry<T, F, Fut>(
    endpoint: &str,
    cancel: &CancelToken,
    delay: Duration,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut attempt: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return None;
        }
        attempt += 1;
        match connect().await {
            Ok(connection) => {
                info!(target: "gw.adapter", endpoint = %endpoint, attempt, "connected");
                return Some(connection);
            }
            Err(err) => {
                record_connect_retry();
                warn!(
                    target: "gw.adapter",
                    endpoint = %endpoint,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %err,
                    "connect failed"
                );
                if cancel.sleep(delay).await {
                    return None;
                }
            }
        }
    }
}
