//! MQTT 发布适配器
//!
//! 每个设备的最新标签快照以 JSON 发布到 `<deviceId>/datas`。
//!
//! ```json
//! // instance.config
//! { "broker": "127.0.0.1", "port": 1883, "username": "u", "password": "p",
//!   "cycle": 1, "deviceList": ["DEV_xxx"] }
//! ```

use crate::error::SinkError;
use crate::runner::{NorthPlan, SinkConnector, SnapshotSink, run_northbound};
use async_trait::async_trait;
use domain::Snapshot;
use gw_pipeline::{AdapterContext, AdapterError, DeviceBinding};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// MQTT 发布实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttPubAppConfig {
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// 快照周期（秒）
    #[serde(default = "default_cycle")]
    pub cycle: f64,
    #[serde(default)]
    pub device_list: Vec<String>,
    #[serde(default)]
    pub qos: u8,
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_cycle() -> f64 {
    1.0
}

impl MqttPubAppConfig {
    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.broker.trim().is_empty() {
            return Err(AdapterError::Config("broker is empty".to_string()));
        }
        Ok(())
    }

    pub fn plan(&self) -> NorthPlan {
        NorthPlan::new(self.cycle, self.device_list.clone())
    }

    /// 只配置用户名时以空密码登录；只有密码没有用户名时忽略并告警。
    pub fn mqtt_options(&self, client_id: impl Into<String>) -> MqttOptions {
        let mut options = MqttOptions::new(client_id, self.broker.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(30));
        match (&self.username, &self.password) {
            (Some(username), password) => {
                options.set_credentials(username.clone(), password.clone().unwrap_or_default());
            }
            (None, Some(_)) => {
                warn!(target: "gw.mqtt", broker = %self.broker, "password without username ignored");
            }
            (None, None) => {}
        }
        options
    }
}

/// 快照 → (主题, 载荷) 列表，每个设备一条。
pub fn device_messages(snapshot: &Snapshot) -> Result<Vec<(String, Vec<u8>)>, SinkError> {
    let mut messages = Vec::with_capacity(snapshot.len());
    for (device_id, samples) in snapshot {
        let payload = serde_json::to_vec(samples)?;
        messages.push((format!("{}/datas", device_id), payload));
    }
    Ok(messages)
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

/// 基于 rumqttc 的连接器，client id 使用实例 ID。
pub struct MqttConnector {
    config: MqttPubAppConfig,
    client_id: String,
}

impl MqttConnector {
    pub fn new(config: MqttPubAppConfig, client_id: impl Into<String>) -> Self {
        Self {
            config,
            client_id: client_id.into(),
        }
    }
}

struct MqttSink {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    qos: QoS,
}

async fn wait_connack(eventloop: &mut EventLoop) -> Result<(), SinkError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if matches!(ack.code, ConnectReturnCode::Success) {
                    Ok(())
                } else {
                    Err(SinkError::Connect(format!("broker refused: {:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(err) => return Err(SinkError::Connect(err.to_string())),
        }
    }
}

#[async_trait]
impl SinkConnector for MqttConnector {
    fn endpoint(&self) -> String {
        format!("mqtt://{}:{}", self.config.broker, self.config.port)
    }

    async fn connect(
        &self,
        _targets: &[DeviceBinding],
    ) -> Result<Box<dyn SnapshotSink>, SinkError> {
        let options = self.config.mqtt_options(self.client_id.clone());
        let (client, mut eventloop) = AsyncClient::new(options, 64);
        tokio::time::timeout(CONNECT_TIMEOUT, wait_connack(&mut eventloop))
            .await
            .map_err(|_| SinkError::Connect("connack timeout".to_string()))??;
        info!(target: "gw.mqtt", endpoint = %self.endpoint(), client_id = %self.client_id, "connected to broker");

        let connected = Arc::new(AtomicBool::new(true));
        let pump = {
            let connected = connected.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(err) = eventloop.poll().await {
                        connected.store(false, Ordering::SeqCst);
                        warn!(target: "gw.mqtt", "mqtt publish eventloop error: {}", err);
                        break;
                    }
                }
            })
        };
        Ok(Box::new(MqttSink {
            client,
            connected,
            pump,
            qos: qos_from_u8(self.config.qos),
        }))
    }
}

#[async_trait]
impl SnapshotSink for MqttSink {
    async fn write(&mut self, snapshot: &Snapshot) -> Result<usize, SinkError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SinkError::Disconnected);
        }
        let mut points = 0;
        for (topic, payload) in device_messages(snapshot)? {
            self.client
                .publish(topic, self.qos, false, payload)
                .await
                .map_err(|err| SinkError::Mqtt(err.to_string()))?;
        }
        for samples in snapshot.values() {
            points += samples.len();
        }
        Ok(points)
    }

    async fn close(&mut self) {
        let _ = self.client.disconnect().await;
        self.pump.abort();
    }
}

/// 运行 MQTT 发布实例直到取消
pub async fn run_mqtt_pub(ctx: AdapterContext) -> Result<(), AdapterError> {
    let config: MqttPubAppConfig = ctx.load_config().await?;
    config.validate()?;
    let plan = config.plan();
    let connector = Arc::new(MqttConnector::new(config, ctx.instance_id.clone()));
    run_northbound(ctx, plan, connector).await
}
