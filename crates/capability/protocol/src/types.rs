//! Modbus 数据类型、功能码与寄存器解析

use crate::error::ProtocolError;
use domain::{SampleValue, TagDataType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Modbus 寄存器数据类型（标签声明的线上类型）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModbusDataType {
    /// 线圈 / 离散输入位，或寄存器非零
    Bool,
    /// 16位有符号整数
    Int16,
    /// 16位无符号整数
    Uint16,
    /// 32位有符号整数（2个寄存器）
    Int32,
    /// 32位无符号整数（2个寄存器）
    Uint32,
    /// 32位浮点数（2个寄存器）
    Float32,
    /// 64位浮点数（4个寄存器）
    Float64,
}

impl ModbusDataType {
    /// 解析线上类型名；基础类型名取默认宽度（int → int16，float → float32）。
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" | "coil" => Ok(Self::Bool),
            "int16" | "int" => Ok(Self::Int16),
            "uint16" => Ok(Self::Uint16),
            "int32" => Ok(Self::Int32),
            "uint32" => Ok(Self::Uint32),
            "float32" | "float" | "real" => Ok(Self::Float32),
            "float64" | "double" => Ok(Self::Float64),
            other => Err(ProtocolError::DataParse(format!(
                "unsupported modbus data type: {}",
                other
            ))),
        }
    }

    /// 需要读取的寄存器（或位）数量
    pub fn register_count(&self) -> u16 {
        match self {
            Self::Bool | Self::Int16 | Self::Uint16 => 1,
            Self::Int32 | Self::Uint32 | Self::Float32 => 2,
            Self::Float64 => 4,
        }
    }

    pub fn tag_type(&self) -> TagDataType {
        match self {
            Self::Bool => TagDataType::Bool,
            Self::Int16 | Self::Uint16 | Self::Int32 | Self::Uint32 => TagDataType::Int,
            Self::Float32 | Self::Float64 => TagDataType::Float,
        }
    }
}

/// Modbus 读功能码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusFunction {
    /// 读线圈状态 (0x01)
    ReadCoils,
    /// 读离散输入 (0x02)
    ReadDiscreteInputs,
    /// 读保持寄存器 (0x03)
    ReadHoldingRegisters,
    /// 读输入寄存器 (0x04)
    ReadInputRegisters,
}

impl ModbusFunction {
    /// 接受数字 3 或字符串 "03"。
    pub fn from_field(field: &Value) -> Result<Self, ProtocolError> {
        match field_u16(field, "function code")? {
            1 => Ok(Self::ReadCoils),
            2 => Ok(Self::ReadDiscreteInputs),
            3 => Ok(Self::ReadHoldingRegisters),
            4 => Ok(Self::ReadInputRegisters),
            other => Err(ProtocolError::DataParse(format!(
                "unsupported function code: {:02}",
                other
            ))),
        }
    }

    pub fn is_bit(&self) -> bool {
        matches!(self, Self::ReadCoils | Self::ReadDiscreteInputs)
    }
}

/// 读取数字或数字字符串形式的寻址字段。
pub fn field_u16(field: &Value, what: &str) -> Result<u16, ProtocolError> {
    let parsed = match field {
        Value::Number(n) => n.as_u64().and_then(|v| u16::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u16>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ProtocolError::DataParse(format!("invalid {}: {}", what, field)))
}

/// 解析寄存器数据为带类型的值（高位寄存器在前）
pub fn parse_registers(
    registers: &[u16],
    data_type: ModbusDataType,
) -> Result<SampleValue, ProtocolError> {
    let needed = data_type.register_count() as usize;
    if registers.len() < needed {
        return Err(ProtocolError::DataParse(format!(
            "need {} registers for {:?}, got {}",
            needed,
            data_type,
            registers.len()
        )));
    }

    let word32 = || ((registers[0] as u32) << 16) | registers[1] as u32;
    let value = match data_type {
        ModbusDataType::Bool => SampleValue::Bool(registers[0] != 0),
        ModbusDataType::Int16 => SampleValue::Int(registers[0] as i16 as i64),
        ModbusDataType::Uint16 => SampleValue::Int(registers[0] as i64),
        ModbusDataType::Int32 => SampleValue::Int(word32() as i32 as i64),
        ModbusDataType::Uint32 => SampleValue::Int(word32() as i64),
        ModbusDataType::Float32 => SampleValue::Float(f32::from_bits(word32()) as f64),
        ModbusDataType::Float64 => {
            let bits = registers[..4]
                .iter()
                .fold(0u64, |acc, r| (acc << 16) | *r as u64);
            SampleValue::Float(f64::from_bits(bits))
        }
    };

    Ok(value)
}
