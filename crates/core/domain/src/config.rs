//! 配置存储中的记录：实例、设备与标签绑定。
//!
//! 记录只由外部 API 写入，引擎侧只读。

use crate::{AppKind, Direction, DomainError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// 一个已配置的桥接实例（南向或北向）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    pub app_code: String,
    pub app_type: Direction,
    #[serde(alias = "instid")]
    pub inst_id: String,
    #[serde(default)]
    pub inst_name: String,
    #[serde(default)]
    pub auto_start: bool,
    /// 适配器私有配置，由各适配器按自身类型解码。
    #[serde(default)]
    pub config: Value,
}

impl InstanceConfig {
    pub fn new(kind: AppKind, inst_id: impl Into<String>, config: Value) -> Self {
        Self {
            app_code: kind.code().to_string(),
            app_type: kind.direction(),
            inst_id: inst_id.into(),
            inst_name: format!("{} app", kind.code()),
            auto_start: false,
            config,
        }
    }

    pub fn kind(&self) -> Result<AppKind, DomainError> {
        AppKind::from_code(&self.app_code)
    }
}

/// 绑定到某个南向实例的现场设备。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(alias = "devid")]
    pub dev_id: String,
    #[serde(default)]
    pub dev_name: String,
    #[serde(default)]
    pub dev_desc: String,
    #[serde(alias = "instid")]
    pub inst_id: String,
    #[serde(default)]
    pub config: Value,
}

impl DeviceConfig {
    pub fn new(dev_id: impl Into<String>, inst_id: impl Into<String>) -> Self {
        let dev_id = dev_id.into();
        Self {
            dev_name: dev_id.clone(),
            dev_id,
            dev_desc: String::new(),
            inst_id: inst_id.into(),
            config: Value::Null,
        }
    }
}

/// 标签声明的基础数据类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagDataType {
    Bool,
    Int,
    Float,
    String,
}

impl TagDataType {
    /// 解析声明类型；协议线上类型名（int16、float32 等）归并到基础类型。
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" | "coil" => Ok(TagDataType::Bool),
            "int" | "int16" | "uint16" | "int32" | "uint32" | "int64" | "integer" => {
                Ok(TagDataType::Int)
            }
            "float" | "float32" | "float64" | "double" | "real" => Ok(TagDataType::Float),
            "string" | "str" | "text" | "varchar" => Ok(TagDataType::String),
            _ => Err(DomainError::UnknownDataType(raw.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TagDataType::Bool => "bool",
            TagDataType::Int => "int",
            TagDataType::Float => "float",
            TagDataType::String => "string",
        }
    }
}

impl fmt::Display for TagDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 设备上的一个数据点。
///
/// 存储形式：collection = deviceId，field = 标签名，value = 寻址字段 JSON 数组，
/// 数组最后一个元素是声明类型。
#[derive(Debug, Clone, PartialEq)]
pub struct TagBinding {
    pub name: String,
    pub fields: Vec<Value>,
}

impl TagBinding {
    pub fn new(name: impl Into<String>, fields: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// 从存储值解析。
    pub fn from_stored(name: &str, raw: &str) -> Result<Self, DomainError> {
        let fields: Vec<Value> = serde_json::from_str(raw)
            .map_err(|err| DomainError::InvalidTag(name.to_string(), err.to_string()))?;
        if fields.is_empty() {
            return Err(DomainError::InvalidTag(
                name.to_string(),
                "empty field list".to_string(),
            ));
        }
        Ok(Self::new(name, fields))
    }

    pub fn to_stored(&self) -> String {
        Value::Array(self.fields.clone()).to_string()
    }

    /// 最后一个字段的原始文本（可能是协议线上类型名）。
    pub fn raw_type(&self) -> Option<&str> {
        self.fields.last().and_then(Value::as_str)
    }

    pub fn declared_type(&self) -> Result<TagDataType, DomainError> {
        let raw = self.raw_type().ok_or_else(|| {
            DomainError::InvalidTag(self.name.clone(), "missing declared type".to_string())
        })?;
        TagDataType::parse(raw)
    }

    /// 类型之前的寻址字段。
    pub fn addressing(&self) -> &[Value] {
        match self.fields.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }
}
