//! TDengine 写入适配器（REST 接口）
//!
//! 每个设备的每个标签一张普通表 `<deviceId>_<tag> (ts TIMESTAMP, v <type>)`，
//! 连接时按标签声明类型建表，写入时一个快照一条多表 INSERT。
//!
//! ```json
//! // instance.config
//! { "host": "127.0.0.1", "port": 6041, "username": "root", "password": "taosdata",
//!   "database": "gateway", "cycle": 5, "deviceList": [] }
//! ```

use crate::error::SinkError;
use crate::runner::{NorthPlan, SinkConnector, SnapshotSink, run_northbound};
use async_trait::async_trait;
use domain::{SampleValue, Snapshot, TagDataType};
use gw_pipeline::{AdapterContext, AdapterError, DeviceBinding};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// TDengine 实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TdengineAppConfig {
    pub host: String,
    #[serde(default = "default_rest_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    /// 快照周期（秒）
    #[serde(default = "default_cycle")]
    pub cycle: f64,
    #[serde(default)]
    pub device_list: Vec<String>,
}

fn default_rest_port() -> u16 {
    6041
}

fn default_cycle() -> f64 {
    5.0
}

impl TdengineAppConfig {
    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.host.trim().is_empty() {
            return Err(AdapterError::Config("host is empty".to_string()));
        }
        if sanitize_identifier(&self.database) != self.database {
            return Err(AdapterError::Config(format!(
                "invalid database name: {}",
                self.database
            )));
        }
        Ok(())
    }

    pub fn rest_url(&self) -> String {
        format!("http://{}:{}/rest/sql", self.host, self.port)
    }

    pub fn plan(&self) -> NorthPlan {
        NorthPlan::new(self.cycle, self.device_list.clone())
    }
}

/// 标签声明类型 → TDengine 列类型
pub fn column_type(data_type: TagDataType) -> &'static str {
    match data_type {
        TagDataType::Bool => "BOOL",
        TagDataType::Int => "INT",
        TagDataType::Float => "FLOAT",
        TagDataType::String => "VARCHAR(64)",
    }
}

/// 只保留 `[A-Za-z0-9_]`，数字开头时加 `t_` 前缀。
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert_str(0, "t_");
    }
    out
}

pub fn table_name(device_id: &str, tag: &str) -> String {
    sanitize_identifier(&format!("{}_{}", device_id, tag))
}

pub fn create_table_sql(database: &str, table: &str, data_type: TagDataType) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (ts TIMESTAMP, v {})",
        database,
        table,
        column_type(data_type)
    )
}

fn value_literal(value: &SampleValue) -> Option<String> {
    match value {
        SampleValue::Bool(v) => Some(v.to_string()),
        SampleValue::Int(v) => Some(v.to_string()),
        SampleValue::Float(v) if v.is_finite() => Some(v.to_string()),
        SampleValue::Float(_) => None,
        SampleValue::Text(v) => Some(format!("'{}'", v.replace('\\', "\\\\").replace('\'', "\\'"))),
    }
}

/// 一个快照对应的多表 INSERT；没有可写的点时返回 `None`。
pub fn insert_sql(database: &str, snapshot: &Snapshot) -> Option<String> {
    let mut sql = String::from("INSERT INTO");
    let mut rows = 0;
    for (device_id, samples) in snapshot {
        for (tag, sample) in samples {
            let Some(literal) = value_literal(&sample.value) else {
                continue;
            };
            sql.push_str(&format!(
                " {}.{} VALUES ({}, {})",
                database,
                table_name(device_id, tag),
                sample.ts_ms,
                literal
            ));
            rows += 1;
        }
    }
    (rows > 0).then_some(sql)
}

#[derive(Debug, Deserialize)]
struct RestResponse {
    code: i64,
    #[serde(default)]
    desc: Option<String>,
}

/// REST 连接器
pub struct TdengineConnector {
    config: TdengineAppConfig,
}

impl TdengineConnector {
    pub fn new(config: TdengineAppConfig) -> Self {
        Self { config }
    }
}

struct TdengineSink {
    http: reqwest::Client,
    config: TdengineAppConfig,
    /// 已确认存在的表
    tables: HashSet<String>,
    /// 建表被服务端拒绝的表，本次连接内不再写入
    rejected: HashSet<String>,
}

impl TdengineSink {
    async fn exec(&self, sql: &str) -> Result<(), SinkError> {
        let response = self
            .http
            .post(self.config.rest_url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .body(sql.to_string())
            .send()
            .await?;
        let body: RestResponse = response.json().await?;
        if body.code != 0 {
            return Err(SinkError::Rejected {
                code: body.code,
                message: body.desc.unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// 确保表存在，返回该表是否可写。
    ///
    /// 服务端拒绝建表只影响这一个标签；链路错误向上返回。
    async fn prepare_table(
        &mut self,
        device_id: &str,
        tag: &str,
        data_type: TagDataType,
    ) -> Result<bool, SinkError> {
        let table = table_name(device_id, tag);
        if self.tables.contains(&table) {
            return Ok(true);
        }
        if self.rejected.contains(&table) {
            return Ok(false);
        }
        match self
            .exec(&create_table_sql(&self.config.database, &table, data_type))
            .await
        {
            Ok(()) => {
                debug!(target: "gw.tdengine", table = %table, column = column_type(data_type), "table ready");
                self.tables.insert(table);
                Ok(true)
            }
            Err(err) if err.is_link_error() => Err(err),
            Err(err) => {
                warn!(
                    target: "gw.tdengine",
                    device_id = %device_id,
                    tag = %tag,
                    error = %err,
                    "create table rejected, tag skipped"
                );
                self.rejected.insert(table);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl SinkConnector for TdengineConnector {
    fn endpoint(&self) -> String {
        self.config.rest_url()
    }

    async fn connect(
        &self,
        targets: &[DeviceBinding],
    ) -> Result<Box<dyn SnapshotSink>, SinkError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let mut sink = TdengineSink {
            http,
            config: self.config.clone(),
            tables: HashSet::new(),
            rejected: HashSet::new(),
        };
        sink.exec(&format!("CREATE DATABASE IF NOT EXISTS {}", self.config.database))
            .await?;

        for binding in targets {
            for tag in &binding.tags {
                let data_type = match tag.declared_type() {
                    Ok(data_type) => data_type,
                    Err(err) => {
                        warn!(target: "gw.tdengine", device_id = %binding.device.dev_id, tag = %tag.name, error = %err, "table skipped");
                        continue;
                    }
                };
                sink.prepare_table(&binding.device.dev_id, &tag.name, data_type)
                    .await?;
            }
        }
        info!(target: "gw.tdengine", endpoint = %self.endpoint(), database = %self.config.database, tables = sink.tables.len(), "connected to tdengine");
        Ok(Box::new(sink))
    }
}

#[async_trait]
impl SnapshotSink for TdengineSink {
    async fn write(&mut self, snapshot: &Snapshot) -> Result<usize, SinkError> {
        // 绑定之后新增的标签按采样值类型补建表；建表被拒的标签不进入 INSERT
        let mut writable = Snapshot::new();
        for (device_id, samples) in snapshot {
            for (tag, sample) in samples {
                if self
                    .prepare_table(device_id, tag, sample.value.data_type())
                    .await?
                {
                    writable
                        .entry(device_id.clone())
                        .or_default()
                        .insert(tag.clone(), sample.clone());
                }
            }
        }
        let Some(sql) = insert_sql(&self.config.database, &writable) else {
            return Ok(0);
        };
        self.exec(&sql).await?;
        Ok(writable.values().map(|samples| samples.len()).sum())
    }

    async fn close(&mut self) {
        self.tables.clear();
        self.rejected.clear();
    }
}

/// 运行 TDengine 写入实例直到取消
pub async fn run_tdengine(ctx: AdapterContext) -> Result<(), AdapterError> {
    let config: TdengineAppConfig = ctx.load_config().await?;
    config.validate()?;
    let plan = config.plan();
    run_northbound(ctx, plan, Arc::new(TdengineConnector::new(config))).await
}
