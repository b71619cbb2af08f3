//! # 网关存储模块
//!
//! 配置存储与实时存储共用同一种哈希语义（collection → field → value），
//! 由外部注入具体后端：
//!
//! - [`traits`]：`HashStore` 异步接口
//! - [`in_memory`]：`RwLock<HashMap>` 实现，用于本地运行与测试
//! - [`redis`]：Redis 哈希命令实现
//! - [`config_store`]：实例/设备/标签绑定的类型化读取
//! - [`runtime_store`]：最新采样值读写
//!
//! ```rust,ignore
//! let backend = Arc::new(RedisHashStore::connect("redis://127.0.0.1:6379/0")?);
//! let config = ConfigStore::new(backend.clone());
//! let instance = config.load_instance("modbus@abc123").await?;
//! ```

pub mod config_store;
pub mod error;
pub mod in_memory;
pub mod redis;
pub mod runtime_store;
pub mod traits;

pub use config_store::ConfigStore;
pub use error::StorageError;
pub use in_memory::*;
pub use redis::RedisHashStore;
pub use runtime_store::RuntimeStore;
pub use traits::HashStore;
