//! 北向生产者/消费者运行框架

use crate::error::SinkError;
use async_trait::async_trait;
use domain::Snapshot;
use gw_pipeline::{
    AdapterContext, AdapterError, CancelHandle, DataQueue, DeviceBinding, connect_with_retry,
};
use gw_telemetry::{
    record_decode_error, record_delivery_failure, record_delivery_success,
    record_snapshot_enqueued,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 已连接的 Sink
#[async_trait]
pub trait SnapshotSink: Send {
    /// 写入一个快照，返回写入的点数。
    async fn write(&mut self, snapshot: &Snapshot) -> Result<usize, SinkError>;

    async fn close(&mut self);
}

/// 建立 Sink 连接
#[async_trait]
pub trait SinkConnector: Send + Sync {
    /// 日志中使用的端点描述
    fn endpoint(&self) -> String;

    /// 连接并准备目标设备所需的对象（如时序表）。
    async fn connect(
        &self,
        targets: &[DeviceBinding],
    ) -> Result<Box<dyn SnapshotSink>, SinkError>;
}

/// 北向实例的公共参数
#[derive(Debug, Clone, PartialEq)]
pub struct NorthPlan {
    /// 快照读取周期
    pub cycle: Duration,
    /// 设备白名单，为空时转发全部设备
    pub device_list: Vec<String>,
}

impl NorthPlan {
    /// `cycle` 以秒为单位；非正数时退回 1 秒。
    pub fn new(cycle_secs: f64, device_list: Vec<String>) -> Self {
        let cycle = if cycle_secs.is_finite() && cycle_secs > 0.0 {
            Duration::from_secs_f64(cycle_secs)
        } else {
            Duration::from_secs(1)
        };
        Self { cycle, device_list }
    }
}

/// 单条队列元素的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// 已写入，附带点数
    Written(usize),
    /// 快照无法解码，跳过
    Skipped,
    /// 写入失败，丢弃
    Dropped,
    /// 写入失败且连接不可用
    LinkLost,
}

/// 解析转发目标：白名单中的设备，或白名单为空时的全部设备，连同各自的标签。
pub async fn resolve_targets(
    ctx: &AdapterContext,
    device_list: &[String],
) -> Result<Vec<DeviceBinding>, AdapterError> {
    let devices = if device_list.is_empty() {
        ctx.config_store.all_devices().await?
    } else {
        ctx.config_store.devices_by_ids(device_list).await?
    };
    if devices.is_empty() {
        return Err(AdapterError::Config(format!(
            "no device to forward for {} (list: {:?})",
            ctx.instance_id, device_list
        )));
    }
    let mut targets = Vec::with_capacity(devices.len());
    for device in devices {
        let tags = ctx.config_store.tags_for_device(&device.dev_id).await?;
        targets.push(DeviceBinding { device, tags });
    }
    Ok(targets)
}

/// 解码一个队列元素并写入 Sink；解码失败跳过，写入失败丢弃，不重试。
pub async fn deliver_item(sink: &mut dyn SnapshotSink, raw: &str) -> Delivery {
    let snapshot: Snapshot = match serde_json::from_str(raw) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            record_decode_error();
            warn!(target: "gw.sink", error = %err, "malformed snapshot skipped");
            return Delivery::Skipped;
        }
    };
    match sink.write(&snapshot).await {
        Ok(points) => {
            record_delivery_success();
            debug!(target: "gw.sink", devices = snapshot.len(), points, "snapshot delivered");
            Delivery::Written(points)
        }
        Err(err) => {
            record_delivery_failure();
            warn!(target: "gw.sink", error = %err, "snapshot delivery failed");
            if err.is_link_error() {
                Delivery::LinkLost
            } else {
                Delivery::Dropped
            }
        }
    }
}

async fn produce(
    ctx: AdapterContext,
    queue: Arc<DataQueue>,
    device_ids: Vec<String>,
    cycle: Duration,
) {
    let policy = ctx.settings.backpressure;
    loop {
        if !policy.wait_for_capacity(&queue, &ctx.cancel).await {
            break;
        }
        match ctx.runtime_store.read_snapshot(&device_ids).await {
            Ok(snapshot) if snapshot.is_empty() => {
                debug!(target: "gw.sink", instance_id = %ctx.instance_id, "no sample yet");
            }
            Ok(snapshot) => match serde_json::to_string(&snapshot) {
                Ok(payload) => {
                    queue.enqueue(payload);
                    record_snapshot_enqueued();
                }
                Err(err) => warn!(
                    target: "gw.sink",
                    instance_id = %ctx.instance_id,
                    error = %err,
                    "snapshot encode failed"
                ),
            },
            Err(err) => warn!(
                target: "gw.sink",
                instance_id = %ctx.instance_id,
                error = %err,
                "runtime store read failed"
            ),
        }
        if ctx.cancel.sleep(cycle).await {
            break;
        }
    }
    debug!(target: "gw.sink", instance_id = %ctx.instance_id, "producer stopped");
}

async fn consume(
    ctx: AdapterContext,
    queue: Arc<DataQueue>,
    connector: Arc<dyn SinkConnector>,
    targets: Arc<Vec<DeviceBinding>>,
) {
    let endpoint = connector.endpoint();
    loop {
        let sink = connect_with_retry(
            &endpoint,
            &ctx.cancel,
            ctx.settings.reconnect_delay,
            || {
                let connector = connector.clone();
                let targets = targets.clone();
                async move { connector.connect(&targets).await.map_err(AdapterError::from) }
            },
        )
        .await;
        let Some(mut sink) = sink else {
            break;
        };

        let cancelled = loop {
            let raw = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break true,
                raw = queue.dequeue() => raw,
            };
            if deliver_item(sink.as_mut(), &raw).await == Delivery::LinkLost {
                break false;
            }
        };
        sink.close().await;
        if cancelled {
            break;
        }
        warn!(
            target: "gw.sink",
            instance_id = %ctx.instance_id,
            endpoint = %endpoint,
            "sink link lost, reconnecting"
        );
    }
    debug!(target: "gw.sink", instance_id = %ctx.instance_id, "consumer stopped");
}

/// 运行北向实例直到取消。
///
/// 生产者与消费者共用一个阶段取消信号：实例取消时两者一起退出；
/// 任一任务提前结束（panic）时取消另一个并返回错误，由注册表注销实例。
pub async fn run_northbound(
    ctx: AdapterContext,
    plan: NorthPlan,
    connector: Arc<dyn SinkConnector>,
) -> Result<(), AdapterError> {
    let targets = resolve_targets(&ctx, &plan.device_list).await?;
    let device_ids: Vec<String> = targets
        .iter()
        .map(|binding| binding.device.dev_id.clone())
        .collect();
    info!(
        target: "gw.sink",
        instance_id = %ctx.instance_id,
        endpoint = %connector.endpoint(),
        devices = device_ids.len(),
        cycle_ms = plan.cycle.as_millis() as u64,
        "northbound adapter starting"
    );

    let stage = CancelHandle::new();
    let stage_ctx = AdapterContext {
        cancel: stage.token(),
        ..ctx.clone()
    };
    let queue = Arc::new(DataQueue::new());
    let mut producer = tokio::spawn(produce(
        stage_ctx.clone(),
        queue.clone(),
        device_ids,
        plan.cycle,
    ));
    let mut consumer = tokio::spawn(consume(
        stage_ctx,
        queue.clone(),
        connector,
        Arc::new(targets),
    ));

    let ended = tokio::select! {
        _ = ctx.cancel.cancelled() => None,
        result = &mut producer => Some(("producer", result)),
        result = &mut consumer => Some(("consumer", result)),
    };
    stage.cancel();

    let Some((task, result)) = ended else {
        info!(
            target: "gw.sink",
            instance_id = %ctx.instance_id,
            pending = queue.len(),
            "northbound adapter stopping"
        );
        for handle in [producer, consumer] {
            if let Err(err) = handle.await {
                warn!(target: "gw.sink", instance_id = %ctx.instance_id, error = %err, "northbound task ended abnormally");
            }
        }
        return Ok(());
    };

    let panicked = result.as_ref().is_err_and(|err| err.is_panic());
    error!(
        target: "gw.sink",
        instance_id = %ctx.instance_id,
        task,
        panicked,
        "northbound task ended before cancellation, stopping instance"
    );
    let sibling = if task == "producer" { consumer } else { producer };
    if let Err(err) = sibling.await {
        warn!(target: "gw.sink", instance_id = %ctx.instance_id, error = %err, "northbound task ended abnormally");
    }
    Err(AdapterError::Delivery(format!(
        "{} task ended unexpectedly{}",
        task,
        if panicked { " (panic)" } else { "" }
    )))
}
