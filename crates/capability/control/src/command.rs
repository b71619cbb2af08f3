//! 远程命令协议（独立桥接进程）
//!
//! 入站 `<hardwareId>/command`：
//!
//! ```json
//! { "start": true, "ver": 2, "appconfig": { "instid": "opcda@434uyjhgwqe" },
//!   "devices": { "DEV_12345678": { "tags": [["tag1", "tag1", "uuid", 1, 3, "int16"]] } } }
//! ```
//!
//! 出站 `<hardwareId>/command/result`：`{ "result": "success" | "failed", "reason": "...", "cmd": {...} }`。
//!
//! 版本只在进程内存中保存：`start=true` 仅当 `ver` 严格大于已应用版本时生效，
//! 生效前先停止当前运行的采集/发布任务对，每个进程同一时刻只有一套配置。

use async_trait::async_trait;
use domain::TagBinding;
use gw_pipeline::{CancelHandle, CancelToken};
use gw_telemetry::{record_command_received, record_command_rejected, record_decode_error};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 命令处理错误
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    Invalid(String),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("channel error: {0}")]
    Channel(String),
}

/// 命令中的一个设备
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandDevice {
    /// 每个标签：`[name, ...寻址字段, dataType]`
    #[serde(default)]
    pub tags: Vec<Vec<Value>>,
}

impl CommandDevice {
    /// 转换为标签绑定；没有名称或没有寻址/类型字段的条目跳过。
    pub fn bindings(&self) -> Vec<TagBinding> {
        self.tags
            .iter()
            .filter_map(|fields| {
                let (name, rest) = fields.split_first()?;
                let name = name.as_str()?;
                if rest.is_empty() {
                    return None;
                }
                Some(TagBinding::new(name, rest.to_vec()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub start: bool,
    #[serde(default)]
    pub ver: i64,
    #[serde(default, alias = "appconfig")]
    pub app_config: Value,
    #[serde(default)]
    pub devices: BTreeMap<String, CommandDevice>,
}

impl Command {
    /// deviceId → 标签绑定，没有可用标签的设备不出现。
    pub fn device_bindings(&self) -> BTreeMap<String, Vec<TagBinding>> {
        self.devices
            .iter()
            .map(|(device_id, device)| (device_id.clone(), device.bindings()))
            .filter(|(_, tags)| !tags.is_empty())
            .collect()
    }
}

/// 发布到结果主题的回执
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: String,
    pub reason: String,
    pub cmd: Value,
}

impl CommandResult {
    pub fn success(reason: impl Into<String>, cmd: Value) -> Self {
        Self {
            result: "success".to_string(),
            reason: reason.into(),
            cmd,
        }
    }

    pub fn failed(reason: impl Into<String>, cmd: Value) -> Self {
        Self {
            result: "failed".to_string(),
            reason: reason.into(),
            cmd,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == "success"
    }
}

/// 主题命名
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTopics {
    pub command: String,
    pub result: String,
    pub data: String,
}

impl CommandTopics {
    pub fn for_hardware(hardware_id: &str) -> Self {
        Self {
            command: format!("{}/command", hardware_id),
            result: format!("{}/command/result", hardware_id),
            data: format!("{}/data", hardware_id),
        }
    }
}

/// 启动一套采集/发布任务对，任务观察 `cancel` 并自行退出。
#[async_trait]
pub trait PairLauncher: Send + Sync {
    async fn launch(
        &self,
        command: &Command,
        cancel: CancelToken,
    ) -> Result<Vec<JoinHandle<()>>, CommandError>;
}

struct RunningPair {
    handle: CancelHandle,
    tasks: Vec<JoinHandle<()>>,
    ver: i64,
}

impl RunningPair {
    async fn stop(self) {
        self.handle.cancel();
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(target: "gw.command", ver = self.ver, error = %err, "pair task ended abnormally");
            }
        }
    }
}

/// 命令状态机：已应用版本 + 当前任务对
pub struct CommandProcessor {
    launcher: Arc<dyn PairLauncher>,
    applied_ver: i64,
    running: Option<RunningPair>,
}

impl CommandProcessor {
    pub fn new(launcher: Arc<dyn PairLauncher>) -> Self {
        Self {
            launcher,
            applied_ver: 0,
            running: None,
        }
    }

    pub fn applied_version(&self) -> i64 {
        self.applied_ver
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// 处理一条原始命令；任何输入都会得到一个回执。
    pub async fn handle(&mut self, payload: &[u8]) -> CommandResult {
        record_command_received();
        let raw: Value = match serde_json::from_slice(payload) {
            Ok(raw) => raw,
            Err(err) => {
                record_decode_error();
                record_command_rejected();
                warn!(target: "gw.command", error = %err, "command payload is not json");
                return CommandResult::failed(
                    format!("invalid command: {}", err),
                    Value::String(String::from_utf8_lossy(payload).into_owned()),
                );
            }
        };
        let command: Command = match serde_json::from_value(raw.clone()) {
            Ok(command) => command,
            Err(err) => {
                record_decode_error();
                record_command_rejected();
                warn!(target: "gw.command", error = %err, "command rejected");
                return CommandResult::failed(format!("invalid command: {}", err), raw);
            }
        };
        info!(target: "gw.command", start = command.start, ver = command.ver, devices = command.devices.len(), "command received");

        if !command.start {
            return self.stop(raw).await;
        }
        if command.ver <= self.applied_ver {
            record_command_rejected();
            info!(target: "gw.command", ver = command.ver, applied = self.applied_ver, "stale command ignored");
            return CommandResult::failed(
                format!("current version {} is newest", self.applied_ver),
                raw,
            );
        }
        self.apply(command, raw).await
    }

    async fn stop(&mut self, raw: Value) -> CommandResult {
        match self.running.take() {
            Some(pair) => {
                pair.stop().await;
                info!(target: "gw.command", "stopped data simulation and publishing");
                CommandResult::success("Stopped data simulation and publishing", raw)
            }
            None => CommandResult::success("No running simulation to stop", raw),
        }
    }

    async fn apply(&mut self, command: Command, raw: Value) -> CommandResult {
        if let Some(pair) = self.running.take() {
            info!(target: "gw.command", old_ver = pair.ver, new_ver = command.ver, "stopping previous configuration");
            pair.stop().await;
        }
        let handle = CancelHandle::new();
        match self.launcher.launch(&command, handle.token()).await {
            Ok(tasks) => {
                self.applied_ver = command.ver;
                self.running = Some(RunningPair {
                    handle,
                    tasks,
                    ver: command.ver,
                });
                info!(target: "gw.command", ver = command.ver, "started data simulation and publishing");
                CommandResult::success("new version is updated", raw)
            }
            Err(err) => {
                record_command_rejected();
                handle.cancel();
                warn!(target: "gw.command", ver = command.ver, error = %err, "command launch failed");
                CommandResult::failed(err.to_string(), raw)
            }
        }
    }

    /// 进程退出前停止当前任务对。
    pub async fn shutdown(&mut self) {
        if let Some(pair) = self.running.take() {
            pair.stop().await;
        }
    }
}
