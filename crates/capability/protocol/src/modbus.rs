//! Modbus 采集适配器
//!
//! 周期轮询绑定到实例的全部标签，每个设备每周期一次批量写入实时存储。
//! 读超时或链路错误视为断线，关闭连接后按固定间隔重连。
//!
//! ## 配置格式
//!
//! ```json
//! // instance.config
//! { "channel": "tcp", "host": "192.168.1.100", "port": 502, "slaveId": 1, "protocol": "tcp" }
//!
//! // 标签绑定：[name, description, unitId, functionCode, registerAddress, dataType]
//! ["temp1", "进水温度", "1", "03", "100", "int16"]
//! ```

use crate::error::ProtocolError;
use crate::types::{ModbusDataType, ModbusFunction, field_u16, parse_registers};
use async_trait::async_trait;
use domain::{Sample, SampleValue, TagBinding, Timestamp};
use gw_pipeline::{AdapterContext, AdapterError, DeviceBatches, DeviceBinding, connect_with_retry};
use gw_telemetry::record_decode_error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

/// Modbus 传输帧格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModbusTransport {
    #[default]
    Tcp,
    /// RTU 帧经 TCP 透传（串口服务器）
    RtuOverTcp,
}

/// Modbus 实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModbusAppConfig {
    /// 物理通道，目前只支持 tcp
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Modbus 服务器主机地址
    pub host: String,
    /// Modbus 服务器端口（默认 502）
    #[serde(default = "default_modbus_port")]
    pub port: u16,
    /// 连接时的默认从站 ID
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    #[serde(default)]
    pub protocol: ModbusTransport,
    /// 轮询间隔（毫秒），缺省使用进程配置
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// 连接与单次读取超时（毫秒）
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_channel() -> String {
    "tcp".to_string()
}

fn default_modbus_port() -> u16 {
    502
}

fn default_slave_id() -> u8 {
    1
}

fn default_timeout() -> u64 {
    1000
}

impl ModbusAppConfig {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.channel != "tcp" {
            return Err(ProtocolError::ConfigParse(format!(
                "unsupported channel: {}",
                self.channel
            )));
        }
        if self.host.trim().is_empty() {
            return Err(ProtocolError::ConfigParse("host is empty".to_string()));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }
}

/// 一个轮询点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusPoint {
    pub device_id: String,
    pub tag_name: String,
    pub unit_id: u8,
    pub function: ModbusFunction,
    pub address: u16,
    pub data_type: ModbusDataType,
}

impl ModbusPoint {
    pub fn from_binding(device_id: &str, tag: &TagBinding) -> Result<Self, ProtocolError> {
        let [_, _, unit, function, address] = tag.addressing() else {
            return Err(ProtocolError::DataParse(format!(
                "tag {} expects [name, description, unitId, functionCode, registerAddress, dataType]",
                tag.name
            )));
        };
        let unit_id = u8::try_from(field_u16(unit, "unit id")?)
            .map_err(|_| ProtocolError::DataParse(format!("invalid unit id: {}", unit)))?;
        let function = ModbusFunction::from_field(function)?;
        let address = field_u16(address, "register address")?;
        let data_type = ModbusDataType::parse(tag.raw_type().unwrap_or_default())?;
        if function.is_bit() && data_type != ModbusDataType::Bool {
            return Err(ProtocolError::DataParse(format!(
                "tag {}: {:?} can only be read as bool",
                tag.name, function
            )));
        }
        Ok(Self {
            device_id: device_id.to_string(),
            tag_name: tag.name.clone(),
            unit_id,
            function,
            address,
            data_type,
        })
    }
}

/// 构建轮询点；无效标签记日志后跳过。
pub fn build_points(bindings: &[DeviceBinding]) -> Vec<ModbusPoint> {
    let mut points = Vec::new();
    for binding in bindings {
        for tag in &binding.tags {
            match ModbusPoint::from_binding(&binding.device.dev_id, tag) {
                Ok(point) => points.push(point),
                Err(err) => warn!(
                    target: "gw.modbus",
                    device_id = %binding.device.dev_id,
                    tag = %tag.name,
                    error = %err,
                    "modbus tag skipped"
                ),
            }
        }
    }
    points
}

/// 已连接的寄存器客户端
#[async_trait]
pub trait RegisterClient: Send {
    /// 读线圈 / 离散输入
    async fn read_bits(
        &mut self,
        unit_id: u8,
        function: ModbusFunction,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ProtocolError>;

    /// 读保持寄存器 / 输入寄存器
    async fn read_words(
        &mut self,
        unit_id: u8,
        function: ModbusFunction,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError>;

    async fn close(&mut self);
}

/// 建立寄存器客户端连接
#[async_trait]
pub trait RegisterConnector: Send + Sync {
    async fn connect(
        &self,
        config: &ModbusAppConfig,
    ) -> Result<Box<dyn RegisterClient>, ProtocolError>;
}

/// 读取单个轮询点
pub async fn read_point(
    client: &mut dyn RegisterClient,
    point: &ModbusPoint,
) -> Result<SampleValue, ProtocolError> {
    if point.function.is_bit() {
        let bits = client
            .read_bits(point.unit_id, point.function, point.address, 1)
            .await?;
        let bit = bits
            .first()
            .copied()
            .ok_or_else(|| ProtocolError::DataParse("empty bit response".to_string()))?;
        return Ok(SampleValue::Bool(bit));
    }
    let words = client
        .read_words(
            point.unit_id,
            point.function,
            point.address,
            point.data_type.register_count(),
        )
        .await?;
    debug!(
        target: "gw.modbus",
        unit = point.unit_id,
        register = point.address,
        values = ?words,
        "read modbus registers"
    );
    parse_registers(&words, point.data_type)
}

/// 基于 tokio-modbus 的连接器
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioModbusConnector;

struct TokioModbusClient {
    ctx: client::Context,
    timeout: Duration,
}

#[async_trait]
impl RegisterConnector for TokioModbusConnector {
    async fn connect(
        &self,
        config: &ModbusAppConfig,
    ) -> Result<Box<dyn RegisterClient>, ProtocolError> {
        let endpoint = config.endpoint();
        let addr = tokio::net::lookup_host(endpoint.as_str())
            .await?
            .next()
            .ok_or_else(|| ProtocolError::Connection(format!("unresolved address: {}", endpoint)))?;
        let slave = Slave(config.slave_id);
        let connecting = async {
            match config.protocol {
                ModbusTransport::Tcp => tcp::connect_slave(addr, slave).await,
                ModbusTransport::RtuOverTcp => tokio::net::TcpStream::connect(addr)
                    .await
                    .map(|stream| rtu::attach_slave(stream, slave)),
            }
        };
        let ctx = timeout(config.timeout(), connecting)
            .await
            .map_err(|_| ProtocolError::Timeout(format!("connect {}", endpoint)))?
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        info!(target: "gw.modbus", endpoint = %endpoint, transport = ?config.protocol, "connected to modbus server");
        Ok(Box::new(TokioModbusClient {
            ctx,
            timeout: config.timeout(),
        }))
    }
}

#[async_trait]
impl RegisterClient for TokioModbusClient {
    async fn read_bits(
        &mut self,
        unit_id: u8,
        function: ModbusFunction,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>, ProtocolError> {
        self.ctx.set_slave(Slave(unit_id));
        let response = match function {
            ModbusFunction::ReadCoils => {
                timeout(self.timeout, self.ctx.read_coils(address, count)).await
            }
            ModbusFunction::ReadDiscreteInputs => {
                timeout(self.timeout, self.ctx.read_discrete_inputs(address, count)).await
            }
            other => {
                return Err(ProtocolError::DataParse(format!(
                    "{:?} does not return bits",
                    other
                )));
            }
        };
        response
            .map_err(|_| ProtocolError::Timeout(format!("read bits at {}", address)))?
            .map_err(|e| ProtocolError::Modbus(e.to_string()))?
            .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))
    }

    async fn read_words(
        &mut self,
        unit_id: u8,
        function: ModbusFunction,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, ProtocolError> {
        self.ctx.set_slave(Slave(unit_id));
        let response = match function {
            ModbusFunction::ReadHoldingRegisters => {
                timeout(self.timeout, self.ctx.read_holding_registers(address, count)).await
            }
            ModbusFunction::ReadInputRegisters => {
                timeout(self.timeout, self.ctx.read_input_registers(address, count)).await
            }
            other => {
                return Err(ProtocolError::DataParse(format!(
                    "{:?} does not return registers",
                    other
                )));
            }
        };
        response
            .map_err(|_| ProtocolError::Timeout(format!("read registers at {}", address)))?
            .map_err(|e| ProtocolError::Modbus(e.to_string()))?
            .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))
    }

    async fn close(&mut self) {
        let _ = self.ctx.disconnect().await;
    }
}

async fn connect(
    ctx: &AdapterContext,
    connector: &Arc<dyn RegisterConnector>,
    config: &ModbusAppConfig,
) -> Option<Box<dyn RegisterClient>> {
    connect_with_retry(
        &config.endpoint(),
        &ctx.cancel,
        ctx.settings.reconnect_delay,
        || {
            let connector = connector.clone();
            let config = config.clone();
            async move { connector.connect(&config).await.map_err(AdapterError::from) }
        },
    )
    .await
}

/// 运行 Modbus 采集循环直到取消
pub async fn run_modbus(
    ctx: AdapterContext,
    connector: Arc<dyn RegisterConnector>,
) -> Result<(), AdapterError> {
    let config: ModbusAppConfig = ctx.load_config().await?;
    config.validate()?;
    let bindings = ctx.resolve_bindings().await?;
    let points = build_points(&bindings);
    if points.is_empty() {
        return Err(AdapterError::Config(format!(
            "no readable modbus tag for {}",
            ctx.instance_id
        )));
    }
    let interval = config
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or(ctx.settings.poll_interval);
    info!(
        target: "gw.modbus",
        instance_id = %ctx.instance_id,
        endpoint = %config.endpoint(),
        points = points.len(),
        "modbus adapter starting"
    );

    let Some(mut client) = connect(&ctx, &connector, &config).await else {
        return Ok(());
    };

    loop {
        let stamp = Timestamp::now();
        let mut batches = DeviceBatches::new();
        let mut link_lost = None;
        for point in &points {
            match read_point(client.as_mut(), point).await {
                Ok(value) => batches
                    .entry(point.device_id.clone())
                    .or_default()
                    .push((point.tag_name.clone(), Sample::at(&stamp, value))),
                Err(err) if err.is_link_error() => {
                    link_lost = Some(err);
                    break;
                }
                Err(err) => {
                    record_decode_error();
                    warn!(
                        target: "gw.modbus",
                        device_id = %point.device_id,
                        tag = %point.tag_name,
                        error = %err,
                        "failed to decode modbus point"
                    );
                }
            }
        }
        ctx.deliver(batches).await;

        if let Some(err) = link_lost {
            warn!(
                target: "gw.modbus",
                instance_id = %ctx.instance_id,
                error = %err,
                "modbus link lost, reconnecting"
            );
            client.close().await;
            match connect(&ctx, &connector, &config).await {
                Some(next) => client = next,
                None => return Ok(()),
            }
            continue;
        }

        if ctx.cancel.sleep(interval).await {
            break;
        }
    }

    client.close().await;
    info!(target: "gw.modbus", instance_id = %ctx.instance_id, "modbus adapter stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_row_reads_unit_function_and_address_by_position() {
        let tag = TagBinding::from_stored(
            "temp1",
            r#"["temp1", "进水温度", "2", "04", "100", "float32"]"#,
        )
        .expect("tag");
        let point = ModbusPoint::from_binding("DEV_PLC1", &tag).expect("point");
        assert_eq!(point.unit_id, 2);
        assert_eq!(point.function, ModbusFunction::ReadInputRegisters);
        assert_eq!(point.address, 100);
        assert_eq!(point.data_type, ModbusDataType::Float32);
        assert_eq!(point.tag_name, "temp1");
    }

    #[test]
    fn short_or_mistyped_rows_are_rejected() {
        let compact = TagBinding::new("p", vec![json!(1), json!("03"), json!(0), json!("int16")]);
        assert!(ModbusPoint::from_binding("DEV", &compact).is_err());

        let coil_as_int = TagBinding::new(
            "run",
            vec![json!("run"), json!(""), json!(1), json!("01"), json!(5), json!("int16")],
        );
        assert!(ModbusPoint::from_binding("DEV", &coil_as_int).is_err());
    }
}
