//! 按 appCode 派发适配器
//!
//! 外部 API 与开机自启走同一条 [`Launcher::start`] 路径，注册表是唯一的运行状态来源。

use crate::registry::{RegistryError, WorkerRegistry};
use domain::{AppKind, InstanceConfig, app_code_of};
use gw_pipeline::{AdapterContext, AdapterError, AdapterSettings, CancelToken};
use gw_protocol::{
    AsyncOpcUaConnector, DriverUnavailable, OpcDaAppConfig, OpcUaAppConfig, RegisterConnector,
    SubscriptionConnector, TokioModbusConnector, run_modbus, run_opcda, run_opcua, run_simulator,
};
use gw_sink::{run_influxdb, run_mqtt_pub, run_tdengine};
use gw_storage::{ConfigStore, RuntimeStore, StorageError};
use std::sync::Arc;
use tracing::{info, warn};

/// 南向驱动接缝；测试中替换为假实现。
#[derive(Clone)]
pub struct Drivers {
    pub modbus: Arc<dyn RegisterConnector>,
    pub opcua: Arc<dyn SubscriptionConnector<OpcUaAppConfig>>,
    pub opcda: Arc<dyn SubscriptionConnector<OpcDaAppConfig>>,
}

impl Default for Drivers {
    fn default() -> Self {
        Self {
            modbus: Arc::new(TokioModbusConnector),
            opcua: Arc::new(AsyncOpcUaConnector::new()),
            opcda: Arc::new(DriverUnavailable::new("opc da")),
        }
    }
}

/// 实例的绑定情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceCheck {
    pub devices: usize,
    pub tags: usize,
}

impl InstanceCheck {
    /// 至少一个设备且至少一个标签。
    pub fn is_ready(&self) -> bool {
        self.devices > 0 && self.tags > 0
    }
}

#[derive(Clone)]
pub struct Launcher {
    registry: WorkerRegistry,
    config_store: ConfigStore,
    runtime_store: RuntimeStore,
    settings: AdapterSettings,
    drivers: Drivers,
}

impl Launcher {
    pub fn new(
        config_store: ConfigStore,
        runtime_store: RuntimeStore,
        settings: AdapterSettings,
    ) -> Self {
        Self {
            registry: WorkerRegistry::new(),
            config_store,
            runtime_store,
            settings,
            drivers: Drivers::default(),
        }
    }

    pub fn with_drivers(mut self, drivers: Drivers) -> Self {
        self.drivers = drivers;
        self
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// 按实例 ID 前缀的 appCode 选择适配器并启动。
    pub fn start(&self, instance_id: &str) -> Result<String, RegistryError> {
        let kind = app_code_of(instance_id)
            .and_then(|code| AppKind::from_code(code).ok())
            .ok_or_else(|| RegistryError::UnknownAppCode(instance_id.to_string()))?;
        let launcher = self.clone();
        let id = instance_id.to_string();
        self.registry.start(instance_id, move |cancel| {
            let ctx = launcher.context(id, cancel);
            run_kind(kind, ctx, launcher.drivers)
        })
    }

    pub fn stop(&self, instance_id: &str) -> Result<(), RegistryError> {
        self.registry.stop(instance_id)
    }

    pub fn list(&self) -> Vec<String> {
        self.registry.list()
    }

    fn context(&self, instance_id: String, cancel: CancelToken) -> AdapterContext {
        AdapterContext {
            instance_id,
            config_store: self.config_store.clone(),
            runtime_store: self.runtime_store.clone(),
            cancel,
            settings: self.settings,
        }
    }

    /// 启动所有 `autoStart` 实例，返回成功启动的 ID。单个实例失败只记日志。
    pub async fn autostart(&self) -> Result<Vec<String>, StorageError> {
        let instances = self.config_store.list_instances().await?;
        let mut started = Vec::new();
        for instance in instances.into_iter().filter(|instance| instance.auto_start) {
            if app_code_of(&instance.inst_id) != Some(instance.app_code.as_str()) {
                warn!(
                    target: "gw.launcher",
                    instance_id = %instance.inst_id,
                    app_code = %instance.app_code,
                    "autostart skipped: app code does not match instance id"
                );
                continue;
            }
            match self.start(&instance.inst_id) {
                Ok(_) => started.push(instance.inst_id),
                Err(err) => warn!(
                    target: "gw.launcher",
                    instance_id = %instance.inst_id,
                    error = %err,
                    "autostart skipped"
                ),
            }
        }
        info!(target: "gw.launcher", started = started.len(), "autostart finished");
        Ok(started)
    }

    /// 统计实例绑定的设备与标签数。
    pub async fn check(&self, instance_id: &str) -> Result<InstanceCheck, StorageError> {
        let devices = self
            .config_store
            .devices_for_instance(instance_id)
            .await?;
        let mut tags = 0;
        for device in &devices {
            tags += self.config_store.tags_for_device(&device.dev_id).await?.len();
        }
        Ok(InstanceCheck {
            devices: devices.len(),
            tags,
        })
    }
}

/// 实例 ID 前缀决定派发的适配器，记录中的 appCode 必须与之一致。
fn ensure_kind(instance: &InstanceConfig, kind: AppKind) -> Result<(), AdapterError> {
    if instance.app_code == kind.code() {
        Ok(())
    } else {
        Err(AdapterError::Config(format!(
            "instance {} is {} by id but {} by record",
            instance.inst_id,
            kind.code(),
            instance.app_code
        )))
    }
}

async fn run_kind(kind: AppKind, ctx: AdapterContext, drivers: Drivers) -> Result<(), AdapterError> {
    ensure_kind(&ctx.load_instance().await?, kind)?;
    match kind {
        AppKind::Modbus => run_modbus(ctx, drivers.modbus).await,
        AppKind::OpcUa => run_opcua(ctx, drivers.opcua).await,
        AppKind::OpcDa => run_opcda(ctx, drivers.opcda).await,
        AppKind::Simulator => run_simulator(ctx).await,
        AppKind::MqttPub => run_mqtt_pub(ctx).await,
        AppKind::TdEngine => run_tdengine(ctx).await,
        AppKind::InfluxDb => run_influxdb(ctx).await,
    }
}
