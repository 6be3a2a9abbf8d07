//! 配置管理
//!
//! 加载顺序：默认值 -> TOML配置文件 -> 环境变量（前缀 `DIAGNOSIS`，层级分隔符 `__`）。
//!
//! ```toml
//! [dispatcher]
//! strategy = "http_poll"
//! poll_interval_seconds = 60
//! local_pool_size = 5
//! ```
//!
//! 对应的环境变量覆盖为 `DIAGNOSIS_DISPATCHER__LOCAL_POOL_SIZE=8`。

pub mod models;

pub use models::*;
