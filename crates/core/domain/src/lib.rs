//! 网关领域模型：实例/设备/标签配置、采样值与存储键空间。

pub mod app;
pub mod config;
pub mod data;
pub mod ids;

pub use app::{AppKind, Direction};
pub use config::{DeviceConfig, InstanceConfig, TagBinding, TagDataType};
pub use data::{DeviceSamples, Sample, SampleValue, Snapshot, Timestamp};
pub use ids::{app_code_of, new_device_id, new_instance_id};

/// 配置存储中实例列表所在的集合键（field = instanceId）。
pub const INSTANCE_LIST_KEY: &str = "instList";

/// 配置存储中设备列表所在的集合键（field = deviceId）。
pub const DEVICE_LIST_KEY: &str = "devAtInst";

/// 领域模型错误。
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("unknown data type: {0}")]
    UnknownDataType(String),
    #[error("unknown app code: {0}")]
    UnknownAppCode(String),
    #[error("invalid tag binding {0}: {1}")]
    InvalidTag(String, String),
    #[error("value {value} cannot be read as {expected}")]
    Coerce { value: String, expected: &'static str },
}
