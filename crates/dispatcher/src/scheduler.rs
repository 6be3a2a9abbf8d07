use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diagnosis_core::{
    config::DispatcherConfig,
    models::{DiagnosisTask, TaskStatus},
    traits::DiagnosisTaskRepository,
    SchedulerError, SchedulerResult,
};
use diagnosis_executor::{DiagnosisExecutor, RunningTasks};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use crate::reaper::{RecoveryReport, StuckTaskReaper};
use crate::registry::WorkerRegistry;
use crate::schedule::{next_run_after_dispatch, should_execute};
use crate::strategy::{CycleReport, SchedulerStatus, SchedulerStrategy, SubmitOutcome};

/// 轮询数据库的任务调度器
///
/// 每个周期先回收卡住的任务，再选出到期任务：有空闲的远程Worker时委派给它，
/// 否则在本地有界执行池中运行。
pub struct TaskScheduler {
    tasks: Arc<dyn DiagnosisTaskRepository>,
    executor: Arc<DiagnosisExecutor>,
    registry: Arc<WorkerRegistry>,
    reaper: StuckTaskReaper,
    pool: Arc<Semaphore>,
    pool_size: usize,
    in_dispatch: RunningTasks,
    poll_interval: Duration,
    redispatch_guard: chrono::Duration,
    loop_running: AtomicBool,
}

impl TaskScheduler {
    pub fn new(
        tasks: Arc<dyn DiagnosisTaskRepository>,
        executor: Arc<DiagnosisExecutor>,
        registry: Arc<WorkerRegistry>,
        config: &DispatcherConfig,
    ) -> Self {
        let reaper = StuckTaskReaper::new(
            tasks.clone(),
            executor.running_tasks().clone(),
            config.stuck_task_timeout_minutes,
        )
        .with_registry(registry.clone());

        Self {
            tasks,
            executor,
            registry,
            reaper,
            pool: Arc::new(Semaphore::new(config.local_pool_size)),
            pool_size: config.local_pool_size,
            in_dispatch: RunningTasks::new(),
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            redispatch_guard: chrono::Duration::minutes(config.stuck_task_timeout_minutes),
            loop_running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    fn is_busy(&self, task_id: i64) -> bool {
        self.in_dispatch.contains(task_id) || self.executor.is_running(task_id)
    }

    /// 先写入下次执行时间，避免执行缓慢或失败时被反复触发
    async fn dispatch_due(
        &self,
        task: &DiagnosisTask,
        now: DateTime<Utc>,
    ) -> SchedulerResult<SubmitOutcome> {
        if let Some(next) = next_run_after_dispatch(task, now, self.redispatch_guard) {
            self.tasks.set_next_run_time(task.id, Some(next)).await?;
        }
        self.dispatch(task).await
    }

    /// 委派或本地执行
    async fn dispatch(&self, task: &DiagnosisTask) -> SchedulerResult<SubmitOutcome> {
        if let Some(worker_id) = self.registry.find_available_worker().await {
            self.registry.assign_task(task.id, &worker_id).await?;
            return Ok(SubmitOutcome::Delegated {
                task_id: task.id,
                worker_id,
            });
        }

        let guard = self
            .in_dispatch
            .try_acquire(task.id)
            .ok_or(SchedulerError::TaskAlreadyRunning { id: task.id })?;
        let pool = self.pool.clone();
        let executor = self.executor.clone();
        let task_id = task.id;

        tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = pool.acquire_owned().await else {
                warn!(task_id, "本地执行池已关闭");
                return;
            };
            let outcome = executor.execute_task(task_id).await;
            debug!(task_id, "本地执行结束, 成功: {}", outcome.is_success());
        });

        debug!(task_id = task.id, "任务 {} 提交到本地执行池", task.name);
        Ok(SubmitOutcome::Local { task_id: task.id })
    }
}

#[async_trait]
impl SchedulerStrategy for TaskScheduler {
    fn name(&self) -> &'static str {
        "http_poll"
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn loop_flag(&self) -> &AtomicBool {
        &self.loop_running
    }

    #[instrument(skip(self))]
    async fn run_cycle(&self) -> SchedulerResult<CycleReport> {
        let mut report = CycleReport {
            reset: self.reaper.run(false).await?.reset,
            ..Default::default()
        };

        let now = Utc::now();
        let due: Vec<DiagnosisTask> = self
            .tasks
            .list_active()
            .await?
            .into_iter()
            .filter(|task| should_execute(task, now) && !self.is_busy(task.id))
            .collect();

        for task in due {
            match self.dispatch_due(&task, now).await {
                Ok(SubmitOutcome::Delegated { .. }) => report.delegated += 1,
                Ok(_) => report.dispatched += 1,
                Err(e) => {
                    error!(task_id = task.id, "派发任务 {} 失败: {}", task.name, e);
                    report.failed += 1;
                    let message = format!("调度失败: {e}");
                    if let Err(e) = self
                        .tasks
                        .update_status(task.id, TaskStatus::Failed, Some(&message))
                        .await
                    {
                        warn!(task_id = task.id, "记录调度失败状态出错: {}", e);
                    }
                }
            }
        }

        if report.dispatched + report.delegated > 0 {
            info!(
                "调度周期完成: 本地执行 {} 个, 委派 {} 个, 回收 {} 个",
                report.dispatched, report.delegated, report.reset
            );
        }
        Ok(report)
    }

    async fn submit(&self, task_id: i64) -> SchedulerResult<SubmitOutcome> {
        let task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id: task_id })?;
        if !task.is_active {
            return Err(SchedulerError::TaskInactive { id: task_id });
        }
        if task.is_running() || self.is_busy(task_id) {
            return Err(SchedulerError::TaskAlreadyRunning { id: task_id });
        }

        info!(task_id, "手动提交任务 {}", task.name);
        self.dispatch(&task).await
    }

    async fn recover_stuck_tasks(&self, force: bool) -> SchedulerResult<RecoveryReport> {
        self.reaper.run(force).await
    }

    async fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            strategy: self.name().to_string(),
            pool_size: self.pool_size,
            available_slots: self.pool.available_permits(),
            running_tasks: self.executor.running_tasks().snapshot(),
            in_dispatch: self.in_dispatch.snapshot(),
            scheduler_running: self.loop_running.load(Ordering::SeqCst),
        }
    }

    async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.in_dispatch.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!("仍有 {} 个本地任务未完成", self.in_dispatch.len());
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}
