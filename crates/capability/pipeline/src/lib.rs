//! 数据管道基础设施
//!
//! - [`queue`]：生产者/消费者之间的 FIFO，空队列时挂起等待
//! - [`backpressure`]：软上限背压，减慢生产者而不是丢弃
//! - [`shutdown`]：每实例一个的协作式取消信号
//! - [`adapter`]：南向/北向适配器共用的解析、连接、写入步骤

pub mod adapter;
pub mod backpressure;
pub mod queue;
pub mod shutdown;

pub use adapter::{
    AdapterContext, AdapterError, AdapterSettings, BoundTag, DeviceBatches, DeviceBinding,
    ItemIndex, connect_with_retry, decode_config,
};
pub use backpressure::BackpressurePolicy;
pub use queue::DataQueue;
pub use shutdown::{CancelHandle, CancelToken};
