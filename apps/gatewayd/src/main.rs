//! 网关进程入口：打开配置/实时存储，自启 `autoStart` 实例，Ctrl+C 时停止全部实例。

use gw_config::{GatewayConfig, StoreBackend};
use gw_control::Launcher;
use gw_pipeline::{AdapterSettings, BackpressurePolicy};
use gw_storage::{ConfigStore, HashStore, InMemoryHashStore, RedisHashStore, RuntimeStore};
use gw_telemetry::{init_tracing, metrics};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = GatewayConfig::from_env()?;
    init_tracing();

    let (config_backend, runtime_backend): (Arc<dyn HashStore>, Arc<dyn HashStore>) =
        match &config.store {
            StoreBackend::Memory => {
                warn!(target: "gw.gatewayd", "using in-memory stores, configuration is not persisted");
                (
                    Arc::new(InMemoryHashStore::new()),
                    Arc::new(InMemoryHashStore::new()),
                )
            }
            StoreBackend::Redis {
                config_url,
                runtime_url,
            } => (
                Arc::new(RedisHashStore::connect(config_url)?),
                Arc::new(RedisHashStore::connect(runtime_url)?),
            ),
        };

    let settings = AdapterSettings {
        reconnect_delay: config.reconnect_delay(),
        poll_interval: config.poll_interval(),
        backpressure: BackpressurePolicy::new(config.queue_soft_cap, config.backpressure_pause()),
    };
    let launcher = Launcher::new(
        ConfigStore::new(config_backend),
        RuntimeStore::new(runtime_backend),
        settings,
    );

    if config.autostart {
        let started = launcher.autostart().await?;
        info!(target: "gw.gatewayd", instances = ?started, "gateway started");
    } else {
        info!(target: "gw.gatewayd", "gateway started, autostart disabled");
    }

    tokio::signal::ctrl_c().await?;
    let stopped = launcher.registry().stop_all();
    info!(target: "gw.gatewayd", stopped, "shutting down");
    if !launcher.registry().wait_idle(config.shutdown_grace()).await {
        warn!(target: "gw.gatewayd", "workers still running after grace period");
    }
    info!(target: "gw.gatewayd", metrics = ?metrics().snapshot(), "gateway stopped");
    Ok(())
}
