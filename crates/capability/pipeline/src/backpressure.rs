//! 生产者侧背压：队列长度达到软上限时暂停，而不是丢弃数据。

use crate::queue::DataQueue;
use crate::shutdown::CancelToken;
use gw_telemetry::record_backpressure;
use std::time::Duration;
use tracing::debug;

/// 背压参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressurePolicy {
    /// 软上限：`len() >= soft_cap` 时生产者暂停。
    pub soft_cap: usize,
    /// 每次暂停的时长。
    pub pause: Duration,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self {
            soft_cap: 1000,
            pause: Duration::from_secs(1),
        }
    }
}

impl BackpressurePolicy {
    pub fn new(soft_cap: usize, pause: Duration) -> Self {
        Self {
            soft_cap: soft_cap.max(1),
            pause,
        }
    }

    pub fn is_saturated(&self, len: usize) -> bool {
        len >= self.soft_cap
    }

    /// 等到队列回落到软上限以下；等待期间被取消返回 `false`。
    pub async fn wait_for_capacity<T>(&self, queue: &DataQueue<T>, cancel: &CancelToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            let len = queue.len();
            if !self.is_saturated(len) {
                return true;
            }
            record_backpressure();
            debug!(
                target: "gw.pipeline",
                queue_len = len,
                soft_cap = self.soft_cap,
                "producer paused by backpressure"
            );
            if cancel.sleep(self.pause).await {
                return false;
            }
        }
    }
}
