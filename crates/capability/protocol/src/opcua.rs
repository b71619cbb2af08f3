//! OPC UA 采集适配器
//!
//! 每个标签的第一个寻址字段是 NodeId，例如
//! `["ns=2;s=模拟器示例.函数.Sine1", "float"]`。
//! 会话与监控项由注入的 [`SubscriptionConnector`] 驱动实现，
//! 默认是 [`crate::opcua_client::AsyncOpcUaConnector`]。

use crate::error::ProtocolError;
use crate::subscription::{SubscriptionConnector, SubscriptionPlan, run_subscription};
use gw_pipeline::{AdapterContext, AdapterError, ItemIndex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 安全策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityPolicy {
    Auto,
    None,
    Basic128Rsa15,
    Basic256,
    Basic256Sha256,
}

/// 消息安全模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityMode {
    Auto,
    None,
    Sign,
    SignAndEncrypt,
}

/// OPC UA 实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpcUaAppConfig {
    pub endpoint: String,
    #[serde(default = "default_auto")]
    pub policy: String,
    #[serde(default = "default_auto")]
    pub mode: String,
    /// 客户端证书路径
    #[serde(default)]
    pub cert: Option<String>,
    /// 客户端私钥路径
    #[serde(default)]
    pub key: Option<String>,
    /// 发布间隔（秒）
    #[serde(default = "default_interval")]
    pub interval: f64,
}

fn default_auto() -> String {
    "auto".to_string()
}

fn default_interval() -> f64 {
    1.0
}

impl OpcUaAppConfig {
    pub fn security_policy(&self) -> Result<SecurityPolicy, ProtocolError> {
        match self.policy.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(SecurityPolicy::Auto),
            "none" => Ok(SecurityPolicy::None),
            "basic128rsa15" => Ok(SecurityPolicy::Basic128Rsa15),
            "basic256" => Ok(SecurityPolicy::Basic256),
            "basic256sha256" => Ok(SecurityPolicy::Basic256Sha256),
            other => Err(ProtocolError::ConfigParse(format!(
                "unknown security policy: {}",
                other
            ))),
        }
    }

    pub fn security_mode(&self) -> Result<SecurityMode, ProtocolError> {
        let normalized: String = self
            .mode
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "" | "auto" => Ok(SecurityMode::Auto),
            "none" => Ok(SecurityMode::None),
            "sign" => Ok(SecurityMode::Sign),
            "signandencrypt" => Ok(SecurityMode::SignAndEncrypt),
            other => Err(ProtocolError::ConfigParse(format!(
                "unknown security mode: {}",
                other
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !self.endpoint.starts_with("opc.tcp://") {
            return Err(ProtocolError::ConfigParse(format!(
                "endpoint must start with opc.tcp://: {}",
                self.endpoint
            )));
        }
        let policy = self.security_policy()?;
        let mode = self.security_mode()?;
        let secured = !matches!(policy, SecurityPolicy::Auto | SecurityPolicy::None)
            || matches!(mode, SecurityMode::Sign | SecurityMode::SignAndEncrypt);
        if secured && (self.cert.is_none() || self.key.is_none()) {
            return Err(ProtocolError::ConfigParse(
                "secured session requires cert and key".to_string(),
            ));
        }
        if !(self.interval > 0.0) {
            return Err(ProtocolError::ConfigParse(format!(
                "invalid publishing interval: {}",
                self.interval
            )));
        }
        Ok(())
    }

    pub fn publishing_interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }
}

/// 运行 OPC UA 订阅直到取消
pub async fn run_opcua(
    ctx: AdapterContext,
    connector: Arc<dyn SubscriptionConnector<OpcUaAppConfig>>,
) -> Result<(), AdapterError> {
    let config: OpcUaAppConfig = ctx.load_config().await?;
    config.validate()?;
    let bindings = ctx.resolve_bindings().await?;
    let index = ItemIndex::from_bindings(&bindings);
    if index.is_empty() {
        return Err(AdapterError::Config(format!(
            "no monitored item for {}",
            ctx.instance_id
        )));
    }
    info!(
        target: "gw.opcua",
        instance_id = %ctx.instance_id,
        endpoint = %config.endpoint,
        items = index.len(),
        "opcua adapter starting"
    );
    let plan = SubscriptionPlan {
        endpoint: config.endpoint.clone(),
        health_interval: config.publishing_interval().max(Duration::from_secs(1)),
        config,
        index,
    };
    run_subscription(&ctx, plan, connector).await
}
