//! 应用类型（appCode）与数据方向。

use crate::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 数据方向：南向采集 / 北向转发。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    ToSouth,
    ToNorth,
}

/// 已知的桥接应用类型，以 appCode 区分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppKind {
    Modbus,
    OpcDa,
    OpcUa,
    Simulator,
    MqttPub,
    TdEngine,
    InfluxDb,
}

impl AppKind {
    pub const ALL: [AppKind; 7] = [
        AppKind::Modbus,
        AppKind::OpcDa,
        AppKind::OpcUa,
        AppKind::Simulator,
        AppKind::MqttPub,
        AppKind::TdEngine,
        AppKind::InfluxDb,
    ];

    /// 存储与实例 ID 前缀中使用的 appCode。
    pub fn code(&self) -> &'static str {
        match self {
            AppKind::Modbus => "modbus",
            AppKind::OpcDa => "opcda",
            AppKind::OpcUa => "opcua",
            AppKind::Simulator => "simulator",
            AppKind::MqttPub => "mqttpub",
            AppKind::TdEngine => "dsTDengine",
            AppKind::InfluxDb => "dsInfluxdb",
        }
    }

    pub fn from_code(code: &str) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or_else(|| DomainError::UnknownAppCode(code.to_string()))
    }

    pub fn direction(&self) -> Direction {
        match self {
            AppKind::Modbus | AppKind::OpcDa | AppKind::OpcUa | AppKind::Simulator => {
                Direction::ToSouth
            }
            AppKind::MqttPub | AppKind::TdEngine | AppKind::InfluxDb => Direction::ToNorth,
        }
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
