//! 实例注册表
//!
//! instanceId → 取消句柄。检查与插入在同一把锁内完成，同一实例最多一个运行中的 worker；
//! worker 退出时按 run id 自行注销，不会误删之后重新启动的同名实例。
//! 锁只在修改 map 时持有，从不跨越 await。

use gw_pipeline::{AdapterError, CancelHandle, CancelToken};
use gw_telemetry::{new_run_id, record_worker_exited, record_worker_panic, record_worker_started};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// 注册表错误，直接返回给调用方，不重试。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("instance {0} is already running")]
    AlreadyRunning(String),
    #[error("instance {0} is not running")]
    NotFound(String),
    #[error("unknown app code in instance id {0}")]
    UnknownAppCode(String),
}

struct WorkerEntry {
    handle: CancelHandle,
    run_id: String,
}

#[derive(Clone)]
pub struct WorkerRegistry {
    workers: Arc<Mutex<HashMap<String, WorkerEntry>>>,
    /// 尚未退出的 worker 任务数（包括已被 stop 但仍在收尾的）
    live: Arc<watch::Sender<usize>>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        let (live, _rx) = watch::channel(0);
        Self {
            workers: Arc::new(Mutex::new(HashMap::new())),
            live: Arc::new(live),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, WorkerEntry>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 启动 worker，立即返回 run id。
    ///
    /// `worker` 收到本次运行的取消令牌；它的 future 在独立任务中执行，
    /// panic 会被捕获并记录，不影响进程。必须在 tokio 运行时内调用。
    pub fn start<F, Fut>(&self, instance_id: &str, worker: F) -> Result<String, RegistryError>
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<(), AdapterError>> + Send + 'static,
    {
        let handle = CancelHandle::new();
        let run_id = new_run_id();
        {
            let mut workers = self.lock();
            if workers.contains_key(instance_id) {
                return Err(RegistryError::AlreadyRunning(instance_id.to_string()));
            }
            workers.insert(
                instance_id.to_string(),
                WorkerEntry {
                    handle: handle.clone(),
                    run_id: run_id.clone(),
                },
            );
        }

        self.live.send_modify(|live| *live += 1);
        record_worker_started();
        info!(target: "gw.registry", instance_id = %instance_id, run_id = %run_id, "worker started");

        let body = tokio::spawn(worker(handle.token()));
        let registry = self.clone();
        let instance_id = instance_id.to_string();
        let task_run_id = run_id.clone();
        tokio::spawn(async move {
            match body.await {
                Ok(Ok(())) => {
                    info!(target: "gw.registry", instance_id = %instance_id, run_id = %task_run_id, "worker exited");
                }
                Ok(Err(err)) => {
                    warn!(target: "gw.registry", instance_id = %instance_id, run_id = %task_run_id, error = %err, "worker exited with error");
                }
                Err(err) if err.is_panic() => {
                    record_worker_panic();
                    error!(target: "gw.registry", instance_id = %instance_id, run_id = %task_run_id, "worker panicked");
                }
                Err(err) => {
                    warn!(target: "gw.registry", instance_id = %instance_id, run_id = %task_run_id, error = %err, "worker aborted");
                }
            }
            registry.deregister(&instance_id, &task_run_id);
            record_worker_exited();
            registry.live.send_modify(|live| *live = live.saturating_sub(1));
        });
        Ok(run_id)
    }

    fn deregister(&self, instance_id: &str, run_id: &str) {
        let mut workers = self.lock();
        let owned = workers
            .get(instance_id)
            .is_some_and(|entry| entry.run_id == run_id);
        if owned {
            workers.remove(instance_id);
        }
    }

    /// 发出取消并移除条目；不等待任务退出。
    pub fn stop(&self, instance_id: &str) -> Result<(), RegistryError> {
        let entry = self
            .lock()
            .remove(instance_id)
            .ok_or_else(|| RegistryError::NotFound(instance_id.to_string()))?;
        entry.handle.cancel();
        info!(target: "gw.registry", instance_id = %instance_id, run_id = %entry.run_id, "worker stop requested");
        Ok(())
    }

    /// 停止全部实例，返回被取消的数量。
    pub fn stop_all(&self) -> usize {
        let entries: Vec<(String, WorkerEntry)> = self.lock().drain().collect();
        for (instance_id, entry) in &entries {
            entry.handle.cancel();
            info!(target: "gw.registry", instance_id = %instance_id, run_id = %entry.run_id, "worker stop requested");
        }
        entries.len()
    }

    /// 当前已注册的实例 ID（排序后的快照）。
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, instance_id: &str) -> bool {
        self.lock().contains_key(instance_id)
    }

    /// 等待所有 worker 任务真正退出；超时返回 false。
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.live.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|live| *live == 0))
            .await
            .is_ok_and(|changed| changed.is_ok())
    }
}
