//! 摄像头诊断调度系统的核心类型
//!
//! 包含错误类型、数据模型、协作者接口、配置和日志初始化。

pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use errors::*;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
