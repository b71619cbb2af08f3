//! # 南向协议适配器
//!
//! 每个适配器遵循同一流程：解析实例配置与绑定 → 带重试连接 →
//! 轮询或订阅采集 → 每设备一次批量写入实时存储，直到取消信号。
//!
//! ```text
//! ConfigStore ──► resolve ──► connect_with_retry ──► acquire ──► RuntimeStore
//!                                   ▲                   │
//!                                   └──── link lost ────┘
//! ```
//!
//! - [`modbus`]：定时轮询（tokio-modbus TCP / RTU over TCP）
//! - [`opcua`] / [`opcda`]：订阅回调 → 私有队列 → 分组写入；
//!   OPC UA 会话由 [`opcua_client`]（async-opcua）提供
//! - [`simulator`]：随机数据

mod error;
pub mod modbus;
pub mod opcda;
pub mod opcua;
pub mod opcua_client;
pub mod simulator;
pub mod subscription;
mod types;

pub use error::ProtocolError;
pub use modbus::{
    ModbusAppConfig, ModbusPoint, ModbusTransport, RegisterClient, RegisterConnector,
    TokioModbusConnector, run_modbus,
};
pub use opcda::{OpcDaAppConfig, run_opcda};
pub use opcua::{OpcUaAppConfig, SecurityMode, SecurityPolicy, run_opcua};
pub use opcua_client::{AsyncOpcUaConnector, EndpointCandidate, select_endpoint, variant_to_json};
pub use simulator::{SimulatorAppConfig, run_simulator};
pub use subscription::{
    DataChange, DriverUnavailable, SubscriptionConnector, SubscriptionPlan, SubscriptionSession,
    regroup, run_subscription,
};
pub use types::*;
