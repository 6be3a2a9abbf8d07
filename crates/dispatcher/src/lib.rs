//! 诊断任务调度
//!
//! 包含到期判断、Worker注册表、卡住任务回收器以及两种调度策略：
//! 轮询数据库的 [`TaskScheduler`] 与基于消息队列的 [`QueueScheduler`]。

pub mod cron_utils;
pub mod queue_scheduler;
pub mod reaper;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod strategy;

pub use cron_utils::CronScheduler;
pub use queue_scheduler::QueueScheduler;
pub use reaper::{RecoveryReport, ResetDetail, StuckTaskReaper};
pub use registry::WorkerRegistry;
pub use scheduler::TaskScheduler;
pub use strategy::{
    run_scheduler_loop, CycleReport, QueueStatus, SchedulerStatus, SchedulerStrategy,
    SubmitOutcome,
};
