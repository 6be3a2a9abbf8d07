//! 内存仓储实现
//!
//! 用于单机嵌入式部署与测试，语义与PostgreSQL实现保持一致。

mod alarm_repository;
mod camera_repository;
mod result_repository;
mod task_repository;

pub use alarm_repository::InMemoryAlarmRepository;
pub use camera_repository::InMemoryCameraRepository;
pub use result_repository::InMemoryResultRepository;
pub use task_repository::InMemoryTaskRepository;
