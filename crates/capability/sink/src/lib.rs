//! # 北向转发适配器
//!
//! 每个北向实例由三部分组成：
//!
//! ```text
//! RuntimeStore ──► producer ──► DataQueue ──► consumer ──► Sink
//!                     ▲   (软上限背压)              │
//!                     └──────── CancelToken ────────┘
//! ```
//!
//! - 生产者按周期读取设备快照，序列化后入队；队列达到软上限时暂停而不是丢弃
//! - 消费者带重试地连接 Sink，连接后持续出队写入；单条失败只记日志
//! - 监督循环只等待取消信号
//!
//! 具体 Sink：
//! - [`mqtt`]：每设备一个 `<deviceId>/datas` 主题
//! - [`tdengine`]：每设备每标签一张 `(ts, v)` 表，REST 接口
//! - [`influxdb`]：line protocol，measurement = 标签名

mod error;
pub mod influxdb;
pub mod mqtt;
pub mod runner;
pub mod tdengine;

pub use error::SinkError;
pub use influxdb::{InfluxAppConfig, InfluxConnector, line_protocol, run_influxdb};
pub use mqtt::{MqttConnector, MqttPubAppConfig, device_messages, run_mqtt_pub};
pub use runner::{
    Delivery, NorthPlan, SinkConnector, SnapshotSink, deliver_item, resolve_targets,
    run_northbound,
};
pub use tdengine::{
    TdengineAppConfig, TdengineConnector, column_type, create_table_sql, insert_sql,
    run_tdengine, table_name,
};
