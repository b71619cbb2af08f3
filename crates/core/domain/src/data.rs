//! 采样值与快照。

use crate::{DomainError, TagDataType};
use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 一个采集周期共用的时间戳。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp {
    pub formatted: String,
    pub ts_ms: i64,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            formatted: now.format(LOCAL_FORMAT).to_string(),
            ts_ms: now.timestamp_millis(),
        }
    }

    /// 由毫秒时间戳构造；越界时退回当前时间。
    pub fn from_millis(ts_ms: i64) -> Self {
        match Local.timestamp_millis_opt(ts_ms).single() {
            Some(at) => Self {
                formatted: at.format(LOCAL_FORMAT).to_string(),
                ts_ms,
            },
            None => Self::now(),
        }
    }
}

/// 带类型的点位值。JSON 中保持原生类型（布尔不会写成整数）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SampleValue {
    pub fn data_type(&self) -> TagDataType {
        match self {
            SampleValue::Bool(_) => TagDataType::Bool,
            SampleValue::Int(_) => TagDataType::Int,
            SampleValue::Float(_) => TagDataType::Float,
            SampleValue::Text(_) => TagDataType::String,
        }
    }

    /// 按声明类型把驱动上报的原始 JSON 值归一化。
    pub fn coerce(raw: &Value, expected: TagDataType) -> Result<Self, DomainError> {
        let fail = || DomainError::Coerce {
            value: raw.to_string(),
            expected: expected.as_str(),
        };
        match expected {
            TagDataType::Bool => match raw {
                Value::Bool(v) => Ok(SampleValue::Bool(*v)),
                Value::Number(n) => n
                    .as_f64()
                    .map(|v| SampleValue::Bool(v != 0.0))
                    .ok_or_else(fail),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "1" | "on" => Ok(SampleValue::Bool(true)),
                    "false" | "0" | "off" => Ok(SampleValue::Bool(false)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
            TagDataType::Int => match raw {
                Value::Bool(v) => Ok(SampleValue::Int(i64::from(*v))),
                Value::Number(n) => n
                    .as_i64()
                    .or_else(|| n.as_f64().map(|v| v as i64))
                    .map(SampleValue::Int)
                    .ok_or_else(fail),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(SampleValue::Int)
                    .map_err(|_| fail()),
                _ => Err(fail()),
            },
            TagDataType::Float => match raw {
                Value::Number(n) => n.as_f64().map(SampleValue::Float).ok_or_else(fail),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(SampleValue::Float)
                    .map_err(|_| fail()),
                _ => Err(fail()),
            },
            TagDataType::String => match raw {
                Value::String(s) => Ok(SampleValue::Text(s.clone())),
                Value::Null => Err(fail()),
                other => Ok(SampleValue::Text(other.to_string())),
            },
        }
    }
}

/// 一个标签的最新采样：`[本地格式时间, 值, 毫秒时间戳]`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, SampleValue, i64)", into = "(String, SampleValue, i64)")]
pub struct Sample {
    pub formatted: String,
    pub value: SampleValue,
    pub ts_ms: i64,
}

impl Sample {
    pub fn at(stamp: &Timestamp, value: SampleValue) -> Self {
        Self {
            formatted: stamp.formatted.clone(),
            value,
            ts_ms: stamp.ts_ms,
        }
    }

    pub fn now(value: SampleValue) -> Self {
        Self::at(&Timestamp::now(), value)
    }

    pub fn to_json(&self) -> String {
        serde_json::json!([self.formatted, self.value, self.ts_ms]).to_string()
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl From<(String, SampleValue, i64)> for Sample {
    fn from((formatted, value, ts_ms): (String, SampleValue, i64)) -> Self {
        Self {
            formatted,
            value,
            ts_ms,
        }
    }
}

impl From<Sample> for (String, SampleValue, i64) {
    fn from(sample: Sample) -> Self {
        (sample.formatted, sample.value, sample.ts_ms)
    }
}

/// 一个设备的标签 → 采样。
pub type DeviceSamples = BTreeMap<String, Sample>;

/// 多个设备的最新值快照：deviceId → 标签 → 采样。
pub type Snapshot = BTreeMap<String, DeviceSamples>;
