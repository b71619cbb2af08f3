//! 进程运行配置加载（环境变量，可由二进制先用 dotenvy 载入 `.env`）。

use std::env;
use std::time::Duration;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 存储后端
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis {
        config_url: String,
        runtime_url: String,
    },
}

/// 网关进程配置。
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub store: StoreBackend,
    pub reconnect_delay_ms: u64,
    pub queue_soft_cap: usize,
    pub backpressure_pause_ms: u64,
    pub poll_interval_ms: u64,
    pub autostart: bool,
    /// 退出时等待 worker 收尾的上限
    pub shutdown_grace_ms: u64,
}

impl GatewayConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = match env::var("GW_STORE")
            .unwrap_or_else(|_| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" => StoreBackend::Memory,
            "redis" => {
                let config_url = env::var("GW_CONFIG_REDIS_URL")
                    .map_err(|_| ConfigError::Missing("GW_CONFIG_REDIS_URL".to_string()))?;
                let runtime_url =
                    read_optional("GW_RUNTIME_REDIS_URL").unwrap_or_else(|| config_url.clone());
                StoreBackend::Redis {
                    config_url,
                    runtime_url,
                }
            }
            other => {
                return Err(ConfigError::Invalid(
                    "GW_STORE".to_string(),
                    other.to_string(),
                ));
            }
        };
        let reconnect_delay_ms = read_u64_with_default("GW_RECONNECT_DELAY_MS", 5000)?;
        let queue_soft_cap = read_u64_with_default("GW_QUEUE_SOFT_CAP", 1000)? as usize;
        let backpressure_pause_ms = read_u64_with_default("GW_BACKPRESSURE_PAUSE_MS", 1000)?;
        let poll_interval_ms = read_u64_with_default("GW_POLL_INTERVAL_MS", 1000)?;
        let autostart = read_bool_with_default("GW_AUTOSTART", true);
        let shutdown_grace_ms = read_u64_with_default("GW_SHUTDOWN_GRACE_MS", 3000)?;
        if queue_soft_cap == 0 {
            return Err(ConfigError::Invalid(
                "GW_QUEUE_SOFT_CAP".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            store,
            reconnect_delay_ms,
            queue_soft_cap,
            backpressure_pause_ms,
            poll_interval_ms,
            autostart,
            shutdown_grace_ms,
        })
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn backpressure_pause(&self) -> Duration {
        Duration::from_millis(self.backpressure_pause_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// 命令桥接进程配置。
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    /// 为空时由 CPU 信息派生
    pub hardware_id: Option<String>,
    pub sim_interval_ms: u64,
    pub pub_interval_ms: u64,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mqtt_host = env::var("GW_BRIDGE_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("GW_BRIDGE_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("GW_BRIDGE_MQTT_USERNAME");
        let mqtt_password = read_optional("GW_BRIDGE_MQTT_PASSWORD");
        let mqtt_client_id =
            env::var("GW_BRIDGE_CLIENT_ID").unwrap_or_else(|_| "opcdaBrg".to_string());
        let hardware_id = read_optional("GW_HARDWARE_ID");
        let sim_interval_ms = read_u64_with_default("GW_BRIDGE_SIM_INTERVAL_MS", 3000)?;
        let pub_interval_ms = read_u64_with_default("GW_BRIDGE_PUB_INTERVAL_MS", 100)?;

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            hardware_id,
            sim_interval_ms,
            pub_interval_ms,
        })
    }

    pub fn sim_interval(&self) -> Duration {
        Duration::from_millis(self.sim_interval_ms.max(1))
    }

    pub fn pub_interval(&self) -> Duration {
        Duration::from_millis(self.pub_interval_ms.max(1))
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
