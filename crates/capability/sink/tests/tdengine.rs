//! TDengine REST 写入与一个最小 HTTP 服务端的交互。

use domain::{DeviceConfig, Sample, SampleValue, Snapshot, TagBinding};
use gw_pipeline::DeviceBinding;
use gw_sink::{SinkConnector, TdengineAppConfig, TdengineConnector};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Statements = Arc<Mutex<Vec<String>>>;

/// 读取一个 HTTP 请求的 body。
async fn read_body(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&buf[header_end..]).into_owned())
}

/// 记录每条 SQL；对名字里带 `_bad` 的建表语句返回错误码。
async fn fake_tdengine(listener: TcpListener, statements: Statements) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let statements = statements.clone();
        tokio::spawn(async move {
            let Ok(sql) = read_body(&mut stream).await else {
                return;
            };
            let reply = if sql.starts_with("CREATE TABLE") && sql.contains("_bad ") {
                r#"{"code":9826,"desc":"invalid table"}"#
            } else {
                r#"{"code":0}"#
            };
            statements.lock().unwrap().push(sql);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                reply.len(),
                reply
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        });
    }
}

#[tokio::test]
async fn rejected_table_skips_only_that_tag() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let statements = Statements::default();
    tokio::spawn(fake_tdengine(listener, statements.clone()));

    let config: TdengineAppConfig = serde_json::from_value(json!({
        "host": "127.0.0.1",
        "port": port,
        "username": "root",
        "password": "taosdata",
        "database": "gw",
    }))
    .expect("config");
    let targets = vec![DeviceBinding {
        device: DeviceConfig::new("DEV_A", "tdengine@t"),
        tags: vec![
            TagBinding::new("temp", vec![json!("float")]),
            TagBinding::new("bad", vec![json!("float")]),
        ],
    }];
    let mut sink = TdengineConnector::new(config)
        .connect(&targets)
        .await
        .expect("connect survives a rejected table");

    let mut snapshot = Snapshot::new();
    let samples = snapshot.entry("DEV_A".to_string()).or_default();
    samples.insert("temp".to_string(), Sample::now(SampleValue::Float(20.5)));
    samples.insert("bad".to_string(), Sample::now(SampleValue::Float(1.0)));
    samples.insert("late".to_string(), Sample::now(SampleValue::Int(7)));

    let written = sink.write(&snapshot).await.expect("write");
    assert_eq!(written, 2);

    let statements = statements.lock().unwrap().clone();
    let insert = statements
        .iter()
        .find(|sql| sql.starts_with("INSERT"))
        .expect("insert sent");
    assert!(insert.contains("gw.DEV_A_temp "));
    assert!(insert.contains("gw.DEV_A_late "));
    assert!(!insert.contains("DEV_A_bad"));
    // 被拒的表不会每个周期重复建表
    let bad_creates = statements
        .iter()
        .filter(|sql| sql.starts_with("CREATE TABLE") && sql.contains("DEV_A_bad "))
        .count();
    assert_eq!(bad_creates, 1);
}
