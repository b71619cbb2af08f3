//! 独立桥接进程的任务对：按命令中的设备/标签模拟数据，经私有队列发布到 `<hardwareId>/data`。

use crate::command::{Command, CommandError, PairLauncher};
use async_trait::async_trait;
use domain::{DeviceSamples, Snapshot, TagDataType};
use gw_pipeline::{BackpressurePolicy, CancelToken, DataQueue};
use gw_protocol::simulator::generate;
use gw_telemetry::{record_delivery_failure, record_delivery_success, record_snapshot_enqueued};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 出站消息通道
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), CommandError>;
}

/// 模拟 + 发布任务对
pub struct SimulatedPair {
    publisher: Arc<dyn Publisher>,
    data_topic: String,
    sim_interval: Duration,
    pub_interval: Duration,
    backpressure: BackpressurePolicy,
}

impl SimulatedPair {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        data_topic: impl Into<String>,
        sim_interval: Duration,
        pub_interval: Duration,
    ) -> Self {
        Self {
            publisher,
            data_topic: data_topic.into(),
            sim_interval,
            pub_interval,
            backpressure: BackpressurePolicy::default(),
        }
    }

    pub fn with_backpressure(mut self, backpressure: BackpressurePolicy) -> Self {
        self.backpressure = backpressure;
        self
    }
}

/// (设备, 标签, 类型)；类型无法识别的标签跳过。
fn command_tags(command: &Command) -> Vec<(String, String, TagDataType)> {
    let mut tags = Vec::new();
    for (device_id, bindings) in command.device_bindings() {
        for tag in bindings {
            match tag.declared_type() {
                Ok(data_type) => tags.push((device_id.clone(), tag.name.clone(), data_type)),
                Err(err) => warn!(
                    target: "gw.bridge",
                    device_id = %device_id,
                    tag = %tag.name,
                    error = %err,
                    "command tag skipped"
                ),
            }
        }
    }
    tags
}

async fn simulate(
    tags: Vec<(String, String, TagDataType)>,
    queue: Arc<DataQueue>,
    policy: BackpressurePolicy,
    interval: Duration,
    cancel: CancelToken,
) {
    loop {
        if !policy.wait_for_capacity(&queue, &cancel).await {
            break;
        }
        let snapshot: Snapshot = generate(&tags)
            .into_iter()
            .map(|(device_id, samples)| (device_id, samples.into_iter().collect::<DeviceSamples>()))
            .collect();
        match serde_json::to_string(&snapshot) {
            Ok(payload) => {
                queue.enqueue(payload);
                record_snapshot_enqueued();
            }
            Err(err) => warn!(target: "gw.bridge", error = %err, "snapshot encode failed"),
        }
        if cancel.sleep(interval).await {
            break;
        }
    }
    debug!(target: "gw.bridge", "simulation stopped");
}

async fn publish(
    publisher: Arc<dyn Publisher>,
    topic: String,
    queue: Arc<DataQueue>,
    interval: Duration,
    cancel: CancelToken,
) {
    loop {
        while let Some(payload) = queue.try_dequeue() {
            match publisher.publish(&topic, payload.into_bytes()).await {
                Ok(()) => record_delivery_success(),
                Err(err) => {
                    record_delivery_failure();
                    warn!(target: "gw.bridge", topic = %topic, error = %err, "publish failed");
                }
            }
            if cancel.is_cancelled() {
                break;
            }
        }
        if cancel.sleep(interval).await {
            break;
        }
    }
    debug!(target: "gw.bridge", pending = queue.len(), "publishing stopped");
}

#[async_trait]
impl PairLauncher for SimulatedPair {
    async fn launch(
        &self,
        command: &Command,
        cancel: CancelToken,
    ) -> Result<Vec<JoinHandle<()>>, CommandError> {
        let tags = command_tags(command);
        if tags.is_empty() {
            return Err(CommandError::Invalid("command carries no usable tag".to_string()));
        }
        info!(
            target: "gw.bridge",
            ver = command.ver,
            tags = tags.len(),
            topic = %self.data_topic,
            "launching simulation pair"
        );
        let queue = Arc::new(DataQueue::new());
        Ok(vec![
            tokio::spawn(simulate(
                tags,
                queue.clone(),
                self.backpressure,
                self.sim_interval,
                cancel.clone(),
            )),
            tokio::spawn(publish(
                self.publisher.clone(),
                self.data_topic.clone(),
                queue,
                self.pub_interval,
                cancel,
            )),
        ])
    }
}

/// 由 CPU 厂商与型号派生 8 位十六进制硬件 ID：`hex(sha256(vendor + model))` 的前 8 位。
pub fn hardware_id_from_cpuinfo(cpuinfo: &str) -> Option<String> {
    let field = |key: &str| {
        cpuinfo.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            (name.trim() == key).then(|| value.trim().to_string())
        })
    };
    let vendor = field("vendor_id").unwrap_or_default();
    let model = field("model name").unwrap_or_default();
    if vendor.is_empty() && model.is_empty() {
        return None;
    }
    let digest = Sha256::digest(format!("{}{}", vendor, model).as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(8);
    Some(id)
}

/// 读取 `/proc/cpuinfo` 计算本机硬件 ID。
pub fn hardware_id() -> Result<String, CommandError> {
    let cpuinfo = std::fs::read_to_string("/proc/cpuinfo")
        .map_err(|err| CommandError::Channel(format!("cpu info unavailable: {}", err)))?;
    hardware_id_from_cpuinfo(&cpuinfo)
        .ok_or_else(|| CommandError::Channel("cpu vendor and model not found".to_string()))
}
