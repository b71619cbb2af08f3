//! 命令通道（rumqttc）：订阅命令主题，回执与数据经同一个客户端发布。

use crate::bridge::Publisher;
use crate::command::{CommandError, CommandProcessor, CommandTopics};
use async_trait::async_trait;
use gw_pipeline::CancelToken;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// MQTT 连接参数
#[derive(Debug, Clone)]
pub struct MqttChannelConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
}

impl MqttChannelConfig {
    /// 只配置用户名时以空密码登录。
    pub fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(Duration::from_secs(30));
        match (&self.username, &self.password) {
            (Some(username), password) => {
                options.set_credentials(username.clone(), password.clone().unwrap_or_default());
            }
            (None, Some(_)) => {
                warn!(target: "gw.channel", host = %self.host, "password without username ignored");
            }
            (None, None) => {}
        }
        options
    }
}

/// 已连接的命令通道
#[derive(Clone)]
pub struct MqttCommandChannel {
    client: AsyncClient,
}

impl MqttCommandChannel {
    /// 建立客户端并启动事件循环；收到的命令载荷送入返回的接收端。
    ///
    /// 事件循环是请求队列唯一的消费者，循环内不等待任何入队操作：
    /// ConnAck 后的重新订阅交给独立任务，命令转发使用无界通道。
    /// 断线由 rumqttc 在下一次 poll 时重连。
    pub fn connect(
        config: MqttChannelConfig,
        topics: &CommandTopics,
    ) -> (Self, mpsc::UnboundedReceiver<Vec<u8>>, JoinHandle<()>) {
        let (client, mut eventloop) = AsyncClient::new(config.mqtt_options(), 64);
        let (tx, rx) = mpsc::unbounded_channel();
        let command_topic = topics.command.clone();
        let subscriber = client.clone();
        let pump = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(target: "gw.channel", topic = %command_topic, "connected, subscribing");
                        let subscriber = subscriber.clone();
                        let topic = command_topic.clone();
                        tokio::spawn(async move {
                            if let Err(err) = subscriber.subscribe(topic, QoS::AtLeastOnce).await {
                                warn!(target: "gw.channel", "mqtt command subscribe error: {}", err);
                            }
                        });
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) if publish.topic == command_topic => {
                        if tx.send(publish.payload.to_vec()).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "gw.channel", "mqtt command eventloop error: {}", err);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        (Self { client }, rx, pump)
    }

    pub async fn disconnect(&self) {
        let _ = self.client.disconnect().await;
    }
}

#[async_trait]
impl Publisher for MqttCommandChannel {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CommandError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|err| CommandError::Channel(err.to_string()))
    }
}

/// 逐条处理命令并发布回执，直到取消或通道关闭；退出前停止当前任务对。
pub async fn run_command_loop(
    mut processor: CommandProcessor,
    mut inbox: mpsc::UnboundedReceiver<Vec<u8>>,
    publisher: Arc<dyn Publisher>,
    topics: CommandTopics,
    cancel: CancelToken,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            payload = inbox.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };
        let result = processor.handle(&payload).await;
        let body = match serde_json::to_vec(&result) {
            Ok(body) => body,
            Err(err) => {
                warn!(target: "gw.channel", error = %err, "command result encode failed");
                continue;
            }
        };
        if let Err(err) = publisher.publish(&topics.result, body).await {
            warn!(target: "gw.channel", topic = %topics.result, error = %err, "command result publish failed");
        }
    }
    processor.shutdown().await;
    info!(target: "gw.channel", applied_ver = processor.applied_version(), "command loop stopped");
}
