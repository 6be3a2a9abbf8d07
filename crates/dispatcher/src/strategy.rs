use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diagnosis_core::{models::QueueInfo, SchedulerResult};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::reaper::RecoveryReport;

/// 任务提交的去向
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// 在本进程执行
    Local { task_id: i64 },
    /// 委派给远程Worker
    Delegated { task_id: i64, worker_id: String },
    /// 发布到任务队列
    Queued { task_id: i64, priority: u8 },
}

impl SubmitOutcome {
    pub fn task_id(&self) -> i64 {
        match self {
            SubmitOutcome::Local { task_id }
            | SubmitOutcome::Delegated { task_id, .. }
            | SubmitOutcome::Queued { task_id, .. } => *task_id,
        }
    }
}

/// 一个调度周期的统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CycleReport {
    pub reset: usize,
    pub dispatched: usize,
    pub delegated: usize,
    pub timed_out: usize,
    pub retried: usize,
    pub results_processed: usize,
    pub failed: usize,
}

/// 调度器状态
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub strategy: String,
    pub pool_size: usize,
    pub available_slots: usize,
    pub running_tasks: Vec<i64>,
    pub in_dispatch: Vec<i64>,
    pub scheduler_running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub task_queue: QueueInfo,
    pub result_queue: QueueInfo,
}

/// 调度策略
///
/// HTTP轮询与消息队列两种调度器实现同一接口，进程启动时按配置选择其一。
#[async_trait]
pub trait SchedulerStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// 两个调度周期之间的间隔
    fn poll_interval(&self) -> Duration;

    /// 调度循环是否在运行，由 [`run_scheduler_loop`] 维护
    fn loop_flag(&self) -> &AtomicBool;

    async fn run_cycle(&self) -> SchedulerResult<CycleReport>;

    /// 立即派发一个任务，不改变其调度计划
    async fn submit(&self, task_id: i64) -> SchedulerResult<SubmitOutcome>;

    async fn recover_stuck_tasks(&self, force: bool) -> SchedulerResult<RecoveryReport>;

    async fn status(&self) -> SchedulerStatus;

    async fn queue_status(&self) -> SchedulerResult<Option<QueueStatus>> {
        Ok(None)
    }

    /// 等待本进程内已派发的任务结束
    async fn drain(&self, timeout: Duration) -> bool;
}

/// 按固定间隔驱动调度周期，直到收到关闭信号
pub async fn run_scheduler_loop(
    strategy: Arc<dyn SchedulerStrategy>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(strategy.poll_interval());
    strategy.loop_flag().store(true, Ordering::SeqCst);
    info!(
        "{} 调度器启动, 周期 {:?}",
        strategy.name(),
        strategy.poll_interval()
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = strategy.run_cycle().await {
                    error!("调度周期执行失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("{} 调度器收到关闭信号", strategy.name());
                break;
            }
        }
    }

    strategy.loop_flag().store(false, Ordering::SeqCst);
}
