//! 命令通道与一个最小 MQTT broker 的交互：连接确认前积压大量发布时，
//! 事件循环仍要完成订阅并继续转发命令。

use gw_control::{CommandTopics, MqttChannelConfig, MqttCommandChannel, Publisher};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const SUBSCRIBE: u8 = 0x80;
const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

/// 读取一个 MQTT 报文：(固定头首字节, 剩余部分)。
async fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let header = stream.read_u8().await?;
    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await?;
        remaining |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; remaining];
    stream.read_exact(&mut body).await?;
    Ok((header, body))
}

fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
    let remaining = 2 + topic.len() + payload.len();
    assert!(remaining < 128);
    let mut packet = vec![0x30, remaining as u8];
    packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    packet.extend_from_slice(topic.as_bytes());
    packet.extend_from_slice(payload);
    packet
}

/// 延迟确认连接；收到 SUBSCRIBE 后通知并下发一条命令。
async fn slow_broker(
    listener: TcpListener,
    connack_delay: Duration,
    command_topic: String,
    subscribed: oneshot::Sender<()>,
) {
    let (mut stream, _) = listener.accept().await.expect("accept");
    let (header, _) = read_packet(&mut stream).await.expect("connect packet");
    assert_eq!(header, 0x10);
    tokio::time::sleep(connack_delay).await;
    stream.write_all(&CONNACK).await.expect("connack");

    let mut subscribed = Some(subscribed);
    while let Ok((header, _)) = read_packet(&mut stream).await {
        if header & 0xF0 == SUBSCRIBE {
            if let Some(tx) = subscribed.take() {
                let _ = tx.send(());
            }
            stream
                .write_all(&publish_packet(&command_topic, br#"{"start": false}"#))
                .await
                .expect("command");
        }
    }
}

#[tokio::test]
async fn backlog_before_connack_does_not_block_subscription() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let topics = CommandTopics::for_hardware("1a2b3c4d");
    let (subscribed_tx, subscribed_rx) = oneshot::channel();
    tokio::spawn(slow_broker(
        listener,
        Duration::from_millis(800),
        topics.command.clone(),
        subscribed_tx,
    ));

    let (channel, mut inbox, pump) = MqttCommandChannel::connect(
        MqttChannelConfig {
            host: "127.0.0.1".to_string(),
            port,
            username: None,
            password: None,
            client_id: "bridge-test".to_string(),
        },
        &topics,
    );

    // 超过请求队列容量（64）的待发数据
    for i in 0..70u8 {
        let channel = channel.clone();
        let topic = topics.data.clone();
        tokio::spawn(async move {
            let _ = channel.publish(&topic, vec![i]).await;
        });
    }

    tokio::time::timeout(Duration::from_secs(3), subscribed_rx)
        .await
        .expect("broker saw SUBSCRIBE")
        .expect("broker alive");
    let command = tokio::time::timeout(Duration::from_secs(3), inbox.recv())
        .await
        .expect("command forwarded")
        .expect("inbox open");
    assert_eq!(command, br#"{"start": false}"#.to_vec());

    pump.abort();
}

#[test]
fn username_without_password_is_kept() {
    let config = MqttChannelConfig {
        host: "127.0.0.1".to_string(),
        port: 1883,
        username: Some("bridge".to_string()),
        password: None,
        client_id: "opcdaBrg".to_string(),
    };
    assert_eq!(
        config.mqtt_options().credentials(),
        Some(("bridge".to_string(), String::new()))
    );
}
