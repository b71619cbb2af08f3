//! 基于 async-opcua 的 OPC UA 订阅驱动
//!
//! 连接流程：取服务端端点列表 → 按策略/模式挑选安全等级最高的端点 →
//! 匿名建会话 → 一个订阅承载全部监控项。数据变化回调直接推入采集队列。

use crate::error::ProtocolError;
use crate::opcua::{OpcUaAppConfig, SecurityMode, SecurityPolicy};
use crate::subscription::{DataChange, SubscriptionConnector, SubscriptionSession};
use async_trait::async_trait;
use gw_pipeline::DataQueue;
use opcua::client::{ClientBuilder, DataChangeCallback, IdentityToken, MonitoredItem, Session};
use opcua::types::{
    DataValue, MessageSecurityMode, MonitoredItemCreateRequest, NodeId, TimestampsToReturn,
    UserTokenPolicy, Variant,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const APPLICATION_URI: &str = "urn:gateway:opcua-client";

const POLICY_NONE: &str = "http://opcfoundation.org/UA/SecurityPolicy#None";
const POLICY_BASIC128RSA15: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic128Rsa15";
const POLICY_BASIC256: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256";
const POLICY_BASIC256SHA256: &str = "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256";

impl SecurityPolicy {
    /// 策略 URI；`Auto` 没有固定 URI。
    pub fn uri(self) -> Option<&'static str> {
        match self {
            SecurityPolicy::Auto => None,
            SecurityPolicy::None => Some(POLICY_NONE),
            SecurityPolicy::Basic128Rsa15 => Some(POLICY_BASIC128RSA15),
            SecurityPolicy::Basic256 => Some(POLICY_BASIC256),
            SecurityPolicy::Basic256Sha256 => Some(POLICY_BASIC256SHA256),
        }
    }
}

/// 服务端公布的一个端点
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCandidate {
    pub url: String,
    pub policy_uri: String,
    pub mode: SecurityMode,
    pub security_level: u8,
}

/// 在候选端点中挑选匹配策略与模式、安全等级最高的一个。
pub fn select_endpoint(
    candidates: &[EndpointCandidate],
    policy: SecurityPolicy,
    mode: SecurityMode,
) -> Option<&EndpointCandidate> {
    candidates
        .iter()
        .filter(|candidate| candidate.mode != SecurityMode::Auto)
        .filter(|candidate| policy.uri().is_none_or(|uri| candidate.policy_uri == uri))
        .filter(|candidate| mode == SecurityMode::Auto || candidate.mode == mode)
        .max_by_key(|candidate| candidate.security_level)
}

fn mode_of(mode: MessageSecurityMode) -> SecurityMode {
    match mode {
        MessageSecurityMode::None => SecurityMode::None,
        MessageSecurityMode::Sign => SecurityMode::Sign,
        MessageSecurityMode::SignAndEncrypt => SecurityMode::SignAndEncrypt,
        // Invalid 不参与选择
        _ => SecurityMode::Auto,
    }
}

fn message_mode(mode: SecurityMode) -> MessageSecurityMode {
    match mode {
        SecurityMode::Sign => MessageSecurityMode::Sign,
        SecurityMode::SignAndEncrypt => MessageSecurityMode::SignAndEncrypt,
        SecurityMode::None | SecurityMode::Auto => MessageSecurityMode::None,
    }
}

/// 监控项的值转换为 JSON；空值返回 `None`。
pub fn variant_to_json(variant: &Variant) -> Option<Value> {
    let value = match variant {
        Variant::Empty => return None,
        Variant::Boolean(v) => json!(v),
        Variant::SByte(v) => json!(v),
        Variant::Byte(v) => json!(v),
        Variant::Int16(v) => json!(v),
        Variant::UInt16(v) => json!(v),
        Variant::Int32(v) => json!(v),
        Variant::UInt32(v) => json!(v),
        Variant::Int64(v) => json!(v),
        Variant::UInt64(v) => json!(v),
        Variant::Float(v) => json!(v),
        Variant::Double(v) => json!(v),
        Variant::String(v) => Value::String(v.as_ref().to_string()),
        other => Value::String(other.to_string()),
    };
    Some(value)
}

/// 解析条目 ID；无法解析的条目记录告警后跳过。
fn parse_items(items: &[String]) -> HashMap<NodeId, String> {
    let mut nodes = HashMap::new();
    for item in items {
        match NodeId::from_str(item) {
            Ok(node_id) => {
                nodes.insert(node_id, item.clone());
            }
            Err(err) => {
                warn!(target: "gw.opcua", item_id = %item, error = ?err, "invalid node id skipped");
            }
        }
    }
    nodes
}

fn on_change(
    nodes: &HashMap<NodeId, String>,
    changes: &DataQueue<DataChange>,
    value: DataValue,
    item: &MonitoredItem,
) {
    let node_id = &item.item_to_monitor().node_id;
    let Some(item_id) = nodes.get(node_id) else {
        return;
    };
    if let Some(status) = value.status {
        if !status.is_good() {
            debug!(target: "gw.opcua", item_id = %item_id, status = %status, "bad quality change ignored");
            return;
        }
    }
    let Some(json) = value.value.as_ref().and_then(variant_to_json) else {
        return;
    };
    changes.enqueue(DataChange {
        item_id: item_id.clone(),
        value: json,
        source_ts_ms: value
            .source_timestamp
            .map(|ts| ts.as_chrono().timestamp_millis()),
    });
}

/// async-opcua 连接器
#[derive(Debug, Clone, Default)]
pub struct AsyncOpcUaConnector;

impl AsyncOpcUaConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SubscriptionConnector<OpcUaAppConfig> for AsyncOpcUaConnector {
    async fn open(
        &self,
        config: &OpcUaAppConfig,
    ) -> Result<Box<dyn SubscriptionSession>, ProtocolError> {
        let policy = config.security_policy()?;
        let mode = config.security_mode()?;

        let mut builder = ClientBuilder::new()
            .application_name("gateway opcua client")
            .application_uri(APPLICATION_URI)
            .product_uri(APPLICATION_URI)
            .trust_server_certs(true)
            .create_sample_keypair(config.cert.is_none())
            .session_retry_limit(0);
        if let (Some(cert), Some(key)) = (&config.cert, &config.key) {
            builder = builder.certificate_path(cert).private_key_path(key);
        }
        let mut client = builder.client().map_err(|errors| {
            ProtocolError::ConfigParse(format!("opcua client config: {}", errors.join("; ")))
        })?;

        let endpoints = tokio::time::timeout(
            CONNECT_TIMEOUT,
            client.get_server_endpoints_from_url(config.endpoint.as_str()),
        )
        .await
        .map_err(|_| ProtocolError::Timeout(format!("get endpoints from {}", config.endpoint)))?
        .map_err(|status| ProtocolError::Connection(format!("get endpoints: {}", status)))?;
        let candidates: Vec<EndpointCandidate> = endpoints
            .iter()
            .map(|endpoint| EndpointCandidate {
                url: endpoint.endpoint_url.as_ref().to_string(),
                policy_uri: endpoint.security_policy_uri.as_ref().to_string(),
                mode: mode_of(endpoint.security_mode),
                security_level: endpoint.security_level,
            })
            .collect();
        let chosen = select_endpoint(&candidates, policy, mode).ok_or_else(|| {
            ProtocolError::Connection(format!(
                "no endpoint of {} matches policy {} / mode {}",
                config.endpoint, config.policy, config.mode
            ))
        })?;
        info!(
            target: "gw.opcua",
            endpoint = %chosen.url,
            policy = %chosen.policy_uri,
            mode = ?chosen.mode,
            "endpoint selected"
        );

        let (session, event_loop) = client
            .connect_to_matching_endpoint(
                (
                    chosen.url.as_str(),
                    chosen.policy_uri.as_str(),
                    message_mode(chosen.mode),
                    UserTokenPolicy::anonymous(),
                ),
                IdentityToken::Anonymous,
            )
            .await
            .map_err(|status| ProtocolError::Connection(format!("create session: {}", status)))?;
        let event_loop = event_loop.spawn();

        match tokio::time::timeout(CONNECT_TIMEOUT, session.wait_for_connection()).await {
            Ok(true) => {}
            Ok(false) => {
                event_loop.abort();
                return Err(ProtocolError::Connection(format!(
                    "session to {} not established",
                    chosen.url
                )));
            }
            Err(_) => {
                event_loop.abort();
                return Err(ProtocolError::Timeout(format!("session to {}", chosen.url)));
            }
        }

        Ok(Box::new(OpcUaSession {
            session,
            event_loop,
            interval: config.publishing_interval(),
        }))
    }
}

struct OpcUaSession {
    session: Arc<Session>,
    event_loop: JoinHandle<opcua::types::StatusCode>,
    interval: Duration,
}

#[async_trait]
impl SubscriptionSession for OpcUaSession {
    async fn subscribe(
        &mut self,
        items: &[String],
        changes: Arc<DataQueue<DataChange>>,
    ) -> Result<(), ProtocolError> {
        let nodes = parse_items(items);
        if nodes.is_empty() {
            return Err(ProtocolError::ConfigParse("no valid node id to monitor".to_string()));
        }
        let requests: Vec<MonitoredItemCreateRequest> =
            nodes.keys().cloned().map(Into::into).collect();
        let nodes = Arc::new(nodes);

        let callback_nodes = nodes.clone();
        let subscription_id = self
            .session
            .create_subscription(
                self.interval,
                10,
                30,
                0,
                0,
                true,
                DataChangeCallback::new(move |value, item| {
                    on_change(&callback_nodes, &changes, value, item);
                }),
            )
            .await
            .map_err(|status| ProtocolError::Connection(format!("create subscription: {}", status)))?;
        let created = self
            .session
            .create_monitored_items(subscription_id, TimestampsToReturn::Both, requests)
            .await
            .map_err(|status| {
                ProtocolError::Connection(format!("create monitored items: {}", status))
            })?;
        debug!(target: "gw.opcua", subscription_id, items = created.len(), "monitored items created");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.event_loop.is_finished()
    }

    async fn release(&mut self) {
        if let Err(status) = self.session.disconnect().await {
            debug!(target: "gw.opcua", status = %status, "disconnect failed");
        }
        self.event_loop.abort();
    }
}
