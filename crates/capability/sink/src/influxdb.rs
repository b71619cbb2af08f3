//! InfluxDB v2 写入适配器
//!
//! 每个标签一个点：measurement = 标签名，tag `dev_id`，field `value`，毫秒精度。
//!
//! ```json
//! // instance.config
//! { "host": "http://127.0.0.1:8086", "token": "...", "org": "gw", "bucket": "edge",
//!   "cycle": 1, "deviceList": [] }
//! ```

use crate::error::SinkError;
use crate::runner::{NorthPlan, SinkConnector, SnapshotSink, run_northbound};
use async_trait::async_trait;
use domain::{SampleValue, Snapshot};
use gw_pipeline::{AdapterContext, AdapterError, DeviceBinding};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// InfluxDB 实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfluxAppConfig {
    /// 服务地址，例如 `http://127.0.0.1:8086`
    pub host: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    /// 快照周期（秒）
    #[serde(default = "default_cycle")]
    pub cycle: f64,
    #[serde(default)]
    pub device_list: Vec<String>,
}

fn default_cycle() -> f64 {
    1.0
}

impl InfluxAppConfig {
    pub fn validate(&self) -> Result<(), AdapterError> {
        if !(self.host.starts_with("http://") || self.host.starts_with("https://")) {
            return Err(AdapterError::Config(format!(
                "host must be an http(s) url: {}",
                self.host
            )));
        }
        if self.org.is_empty() || self.bucket.is_empty() {
            return Err(AdapterError::Config("org and bucket are required".to_string()));
        }
        Ok(())
    }

    fn base_url(&self) -> &str {
        self.host.trim_end_matches('/')
    }

    pub fn plan(&self) -> NorthPlan {
        NorthPlan::new(self.cycle, self.device_list.clone())
    }
}

fn escape_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, ',' | '=' | ' ') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn field_value(value: &SampleValue) -> Option<String> {
    match value {
        SampleValue::Bool(v) => Some(v.to_string()),
        SampleValue::Int(v) => Some(format!("{}i", v)),
        SampleValue::Float(v) if v.is_finite() => Some(v.to_string()),
        SampleValue::Float(_) => None,
        SampleValue::Text(v) => Some(format!("\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))),
    }
}

/// 快照 → line protocol，每行一个点；非有限浮点数跳过。
pub fn line_protocol(snapshot: &Snapshot) -> String {
    let mut lines = Vec::new();
    for (device_id, samples) in snapshot {
        for (tag, sample) in samples {
            let Some(value) = field_value(&sample.value) else {
                continue;
            };
            lines.push(format!(
                "{},dev_id={} value={} {}",
                escape_key(tag),
                escape_key(device_id),
                value,
                sample.ts_ms
            ));
        }
    }
    lines.join("\n")
}

/// HTTP 连接器
pub struct InfluxConnector {
    config: InfluxAppConfig,
}

impl InfluxConnector {
    pub fn new(config: InfluxAppConfig) -> Self {
        Self { config }
    }
}

struct InfluxSink {
    http: reqwest::Client,
    config: InfluxAppConfig,
}

#[async_trait]
impl SinkConnector for InfluxConnector {
    fn endpoint(&self) -> String {
        self.config.base_url().to_string()
    }

    async fn connect(
        &self,
        _targets: &[DeviceBinding],
    ) -> Result<Box<dyn SnapshotSink>, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let response = http
            .get(format!("{}/health", self.config.base_url()))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SinkError::Connect(format!(
                "health check returned {}",
                response.status()
            )));
        }
        info!(target: "gw.influxdb", endpoint = %self.endpoint(), bucket = %self.config.bucket, "connected to influxdb");
        Ok(Box::new(InfluxSink {
            http,
            config: self.config.clone(),
        }))
    }
}

#[async_trait]
impl SnapshotSink for InfluxSink {
    async fn write(&mut self, snapshot: &Snapshot) -> Result<usize, SinkError> {
        let body = line_protocol(snapshot);
        if body.is_empty() {
            return Ok(0);
        }
        let points = body.lines().count();
        let response = self
            .http
            .post(format!("{}/api/v2/write", self.config.base_url()))
            .query(&[
                ("org", self.config.org.as_str()),
                ("bucket", self.config.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                code: i64::from(status.as_u16()),
                message,
            });
        }
        Ok(points)
    }

    async fn close(&mut self) {}
}

/// 运行 InfluxDB 写入实例直到取消
pub async fn run_influxdb(ctx: AdapterContext) -> Result<(), AdapterError> {
    let config: InfluxAppConfig = ctx.load_config().await?;
    config.validate()?;
    let plan = config.plan();
    run_northbound(ctx, plan, Arc::new(InfluxConnector::new(config))).await
}
