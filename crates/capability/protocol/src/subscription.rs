//! 订阅型采集（OPC UA 监控项、OPC DA 组回调）
//!
//! 驱动回调只负责把变化推入本实例私有的 [`DataQueue`]；
//! 采集循环取出后按设备重新分组，每个设备一次批量写入。

use crate::error::ProtocolError;
use async_trait::async_trait;
use domain::{Sample, SampleValue, Timestamp};
use gw_pipeline::{AdapterContext, AdapterError, DataQueue, DeviceBatches, ItemIndex, connect_with_retry};
use gw_telemetry::record_decode_error;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 驱动上报的一次数据变化
#[derive(Debug, Clone, PartialEq)]
pub struct DataChange {
    /// 协议原生条目 ID（OPC UA NodeId / OPC DA ItemID）
    pub item_id: String,
    pub value: Value,
    /// 源端时间戳（毫秒），缺省使用接收时间
    pub source_ts_ms: Option<i64>,
}

impl DataChange {
    pub fn new(item_id: impl Into<String>, value: Value) -> Self {
        Self {
            item_id: item_id.into(),
            value,
            source_ts_ms: None,
        }
    }
}

/// 已打开的订阅会话
#[async_trait]
pub trait SubscriptionSession: Send {
    /// 注册条目，之后的变化推入 `changes`。
    async fn subscribe(
        &mut self,
        items: &[String],
        changes: Arc<DataQueue<DataChange>>,
    ) -> Result<(), ProtocolError>;

    fn is_connected(&self) -> bool;

    /// 取消订阅并关闭会话。
    async fn release(&mut self);
}

/// 打开订阅会话，`C` 为协议配置
#[async_trait]
pub trait SubscriptionConnector<C>: Send + Sync
where
    C: Send + Sync,
{
    async fn open(&self, config: &C) -> Result<Box<dyn SubscriptionSession>, ProtocolError>;
}

/// 未接入原生驱动时使用的连接器：每次打开都返回连接错误，
/// 适配器按重连间隔持续重试直到取消，不会占用注册表之外的资源。
#[derive(Debug, Clone, Copy)]
pub struct DriverUnavailable {
    pub protocol: &'static str,
}

impl DriverUnavailable {
    pub const fn new(protocol: &'static str) -> Self {
        Self { protocol }
    }
}

#[async_trait]
impl<C> SubscriptionConnector<C> for DriverUnavailable
where
    C: Send + Sync + 'static,
{
    async fn open(&self, _config: &C) -> Result<Box<dyn SubscriptionSession>, ProtocolError> {
        Err(ProtocolError::Connection(format!(
            "no {} driver linked into this gateway",
            self.protocol
        )))
    }
}

/// 订阅循环参数
pub struct SubscriptionPlan<C> {
    pub endpoint: String,
    pub config: C,
    pub index: ItemIndex,
    /// 会话存活检查间隔
    pub health_interval: Duration,
}

enum SessionEnd {
    Cancelled,
    Lost,
}

/// 把一批变化按设备分组并归一化为采样；未知条目与无法转换的值被跳过。
pub fn regroup(index: &ItemIndex, changes: Vec<DataChange>) -> DeviceBatches {
    let mut batches = DeviceBatches::new();
    let received = Timestamp::now();
    for change in changes {
        let Some(bound) = index.get(&change.item_id) else {
            debug!(target: "gw.subscription", item_id = %change.item_id, "change for unknown item ignored");
            continue;
        };
        let value = match SampleValue::coerce(&change.value, bound.data_type) {
            Ok(value) => value,
            Err(err) => {
                record_decode_error();
                warn!(
                    target: "gw.subscription",
                    device_id = %bound.device_id,
                    tag = %bound.tag_name,
                    error = %err,
                    "data change skipped"
                );
                continue;
            }
        };
        let stamp = match change.source_ts_ms {
            Some(ts_ms) => Timestamp::from_millis(ts_ms),
            None => received.clone(),
        };
        batches
            .entry(bound.device_id.clone())
            .or_default()
            .push((bound.tag_name.clone(), Sample::at(&stamp, value)));
    }
    batches
}

/// 运行订阅循环直到取消；会话失效时释放并重连。
pub async fn run_subscription<C>(
    ctx: &AdapterContext,
    plan: SubscriptionPlan<C>,
    connector: Arc<dyn SubscriptionConnector<C>>,
) -> Result<(), AdapterError>
where
    C: Clone + Send + Sync + 'static,
{
    let changes = Arc::new(DataQueue::<DataChange>::new());
    let items = plan.index.item_ids().to_vec();

    loop {
        let session = connect_with_retry(
            &plan.endpoint,
            &ctx.cancel,
            ctx.settings.reconnect_delay,
            || {
                let connector = connector.clone();
                let config = plan.config.clone();
                let items = items.clone();
                let changes = changes.clone();
                async move {
                    let mut session = connector.open(&config).await.map_err(AdapterError::from)?;
                    if let Err(err) = session.subscribe(&items, changes).await {
                        session.release().await;
                        return Err(AdapterError::from(err));
                    }
                    Ok::<_, AdapterError>(session)
                }
            },
        )
        .await;
        let Some(mut session) = session else {
            return Ok(());
        };
        info!(
            target: "gw.subscription",
            instance_id = %ctx.instance_id,
            endpoint = %plan.endpoint,
            items = items.len(),
            "subscription active"
        );

        let mut health = tokio::time::interval(plan.health_interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let end = loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => break SessionEnd::Cancelled,
                first = changes.dequeue() => {
                    let mut batch = vec![first];
                    batch.extend(changes.drain());
                    ctx.deliver(regroup(&plan.index, batch)).await;
                }
                _ = health.tick() => {
                    if !session.is_connected() {
                        break SessionEnd::Lost;
                    }
                }
            }
        };
        session.release().await;

        match end {
            SessionEnd::Cancelled => {
                info!(target: "gw.subscription", instance_id = %ctx.instance_id, "subscription released");
                return Ok(());
            }
            SessionEnd::Lost => {
                warn!(
                    target: "gw.subscription",
                    instance_id = %ctx.instance_id,
                    endpoint = %plan.endpoint,
                    "session lost, reconnecting"
                );
            }
        }
    }
}
