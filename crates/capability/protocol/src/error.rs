//! 协议错误类型定义

use gw_pipeline::AdapterError;

/// 协议通信错误
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// 配置解析错误
    #[error("config parse error: {0}")]
    ConfigParse(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 订阅会话失效
    #[error("session closed")]
    SessionClosed,
}

impl ProtocolError {
    /// 链路级错误：需要断开重连，而不是只跳过当前标签。
    pub fn is_link_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::Connection(_)
                | ProtocolError::Io(_)
                | ProtocolError::Modbus(_)
                | ProtocolError::Timeout(_)
                | ProtocolError::SessionClosed
        )
    }
}

impl From<ProtocolError> for AdapterError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::ConfigParse(message) => AdapterError::Config(message),
            ProtocolError::DataParse(message) => AdapterError::Decode(message),
            other => AdapterError::Connect(other.to_string()),
        }
    }
}
