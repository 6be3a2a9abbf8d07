//! 诊断任务执行器
//!
//! 负责单个诊断任务的完整执行：解析摄像头、获取图像、归档图像、
//! 逐个运行诊断算法并写入结果与告警。进程内的运行集合保证同一任务
//! 不会被并发执行。

pub mod archive;
pub mod executor;
mod records;
pub mod running;

pub use archive::{ArchivedImage, ImageArchive};
pub use executor::{DiagnosisExecutor, DiagnosisExecutorBuilder, ExecutorRepositories};
pub use running::{RunningGuard, RunningTasks};
