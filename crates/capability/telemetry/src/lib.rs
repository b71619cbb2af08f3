//! 追踪初始化与进程级计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub samples_written: u64,
    pub store_write_failure: u64,
    pub snapshots_enqueued: u64,
    pub delivery_success: u64,
    pub delivery_failure: u64,
    pub decode_errors: u64,
    pub backpressure: u64,
    pub connect_retries: u64,
    pub workers_started: u64,
    pub workers_exited: u64,
    pub worker_panics: u64,
    pub commands_received: u64,
    pub commands_rejected: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    samples_written: AtomicU64,
    store_write_failure: AtomicU64,
    snapshots_enqueued: AtomicU64,
    delivery_success: AtomicU64,
    delivery_failure: AtomicU64,
    decode_errors: AtomicU64,
    backpressure: AtomicU64,
    connect_retries: AtomicU64,
    workers_started: AtomicU64,
    workers_exited: AtomicU64,
    worker_panics: AtomicU64,
    commands_received: AtomicU64,
    commands_rejected: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            samples_written: AtomicU64::new(0),
            store_write_failure: AtomicU64::new(0),
            snapshots_enqueued: AtomicU64::new(0),
            delivery_success: AtomicU64::new(0),
            delivery_failure: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            backpressure: AtomicU64::new(0),
            connect_retries: AtomicU64::new(0),
            workers_started: AtomicU64::new(0),
            workers_exited: AtomicU64::new(0),
            worker_panics: AtomicU64::new(0),
            commands_received: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            samples_written: self.samples_written.load(Ordering::Relaxed),
            store_write_failure: self.store_write_failure.load(Ordering::Relaxed),
            snapshots_enqueued: self.snapshots_enqueued.load(Ordering::Relaxed),
            delivery_success: self.delivery_success.load(Ordering::Relaxed),
            delivery_failure: self.delivery_failure.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            connect_retries: self.connect_retries.load(Ordering::Relaxed),
            workers_started: self.workers_started.load(Ordering::Relaxed),
            workers_exited: self.workers_exited.load(Ordering::Relaxed),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
            commands_received: self.commands_received.load(Ordering::Relaxed),
            commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 单次 worker 运行的标识，写入启动/退出日志。
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 记录写入实时存储的采样条数。
pub fn record_samples_written(count: u64) {
    metrics()
        .samples_written
        .fetch_add(count, Ordering::Relaxed);
}

pub fn record_store_write_failure() {
    metrics().store_write_failure.fetch_add(1, Ordering::Relaxed);
}

pub fn record_snapshot_enqueued() {
    metrics().snapshots_enqueued.fetch_add(1, Ordering::Relaxed);
}

pub fn record_delivery_success() {
    metrics().delivery_success.fetch_add(1, Ordering::Relaxed);
}

pub fn record_delivery_failure() {
    metrics().delivery_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录解码失败（存储 JSON 或协议载荷）。
pub fn record_decode_error() {
    metrics().decode_errors.fetch_add(1, Ordering::Relaxed);
}

/// 记录背压暂停次数。
pub fn record_backpressure() {
    metrics().backpressure.fetch_add(1, Ordering::Relaxed);
}

pub fn record_connect_retry() {
    metrics().connect_retries.fetch_add(1, Ordering::Relaxed);
}

pub fn record_worker_started() {
    metrics().workers_started.fetch_add(1, Ordering::Relaxed);
}

pub fn record_worker_exited() {
    metrics().workers_exited.fetch_add(1, Ordering::Relaxed);
}

pub fn record_worker_panic() {
    metrics().worker_panics.fetch_add(1, Ordering::Relaxed);
}

pub fn record_command_received() {
    metrics().commands_received.fetch_add(1, Ordering::Relaxed);
}

pub fn record_command_rejected() {
    metrics().commands_rejected.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_only_grow() {
        let before = metrics().snapshot();
        record_backpressure();
        record_samples_written(3);
        let after = metrics().snapshot();
        assert!(after.backpressure >= before.backpressure + 1);
        assert!(after.samples_written >= before.samples_written + 3);
    }

    #[test]
    fn run_ids_are_distinct() {
        let a = new_run_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, new_run_id());
    }
}
