//! 北向 Sink 错误类型

use gw_pipeline::AdapterError;

/// Sink 连接与写入错误
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// 建立连接失败
    #[error("connect error: {0}")]
    Connect(String),

    /// 连接已断开，需要重连
    #[error("sink disconnected")]
    Disconnected,

    /// HTTP 请求失败
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// MQTT 客户端错误
    #[error("mqtt error: {0}")]
    Mqtt(String),

    /// Sink 拒绝了请求（SQL 错误、鉴权失败等）
    #[error("rejected by sink ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// 载荷编码失败
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SinkError {
    /// 链路级错误：当前连接不可再用，消费者应断开重连。
    pub fn is_link_error(&self) -> bool {
        match self {
            SinkError::Connect(_) | SinkError::Disconnected | SinkError::Mqtt(_) => true,
            SinkError::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            SinkError::Rejected { .. } | SinkError::Encode(_) => false,
        }
    }
}

impl From<SinkError> for AdapterError {
    fn from(err: SinkError) -> Self {
        if err.is_link_error() {
            AdapterError::Connect(err.to_string())
        } else {
            AdapterError::Delivery(err.to_string())
        }
    }
}
