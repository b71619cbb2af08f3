//! OPC DA 采集适配器
//!
//! 标签第一个寻址字段是 ItemID，例如 `["Random.Real4", "float"]`。
//! COM/DCOM 访问由注入的 [`SubscriptionConnector`] 驱动实现。

use crate::error::ProtocolError;
use crate::subscription::{SubscriptionConnector, SubscriptionPlan, run_subscription};
use gw_pipeline::{AdapterContext, AdapterError, ItemIndex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// OPC DA 实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcDaAppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(rename = "progID", alias = "progId")]
    pub prog_id: String,
    /// 组刷新周期（毫秒）
    #[serde(rename = "updateRate", default = "default_update_rate")]
    pub update_rate_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_update_rate() -> u64 {
    1000
}

impl OpcDaAppConfig {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.prog_id.trim().is_empty() {
            return Err(ProtocolError::ConfigParse("progID is empty".to_string()));
        }
        if self.update_rate_ms == 0 {
            return Err(ProtocolError::ConfigParse("updateRate must be positive".to_string()));
        }
        Ok(())
    }

    pub fn endpoint(&self) -> String {
        format!("opcda://{}/{}", self.host, self.prog_id)
    }
}

/// 运行 OPC DA 订阅直到取消
pub async fn run_opcda(
    ctx: AdapterContext,
    connector: Arc<dyn SubscriptionConnector<OpcDaAppConfig>>,
) -> Result<(), AdapterError> {
    let config: OpcDaAppConfig = ctx.load_config().await?;
    config.validate()?;
    let bindings = ctx.resolve_bindings().await?;
    let index = ItemIndex::from_bindings(&bindings);
    if index.is_empty() {
        return Err(AdapterError::Config(format!(
            "no opc item for {}",
            ctx.instance_id
        )));
    }
    info!(
        target: "gw.opcda",
        instance_id = %ctx.instance_id,
        server = %config.endpoint(),
        items = index.len(),
        "opcda adapter starting"
    );
    let plan = SubscriptionPlan {
        endpoint: config.endpoint(),
        health_interval: Duration::from_millis(config.update_rate_ms.max(1000)),
        config,
        index,
    };
    run_subscription(&ctx, plan, connector).await
}
