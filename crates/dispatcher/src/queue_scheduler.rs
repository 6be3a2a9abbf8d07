use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diagnosis_core::{
    config::QueueSchedulerConfig,
    models::{
        DiagnosisTask, ExecutionOutcome, TaskDispatchMessage, TaskPayload, TaskResultMessage,
        TaskStatus, MAX_PRIORITY,
    },
    traits::{DiagnosisTaskRepository, MessageQueue},
    SchedulerError, SchedulerResult,
};
use diagnosis_executor::RunningTasks;
use tracing::{debug, error, info, instrument, warn};

use crate::reaper::{RecoveryReport, StuckTaskReaper};
use crate::registry::WorkerRegistry;
use crate::schedule::{dispatch_priority, next_cron_run, next_run_after_dispatch, should_execute};
use crate::strategy::{
    CycleReport, QueueStatus, SchedulerStatus, SchedulerStrategy, SubmitOutcome,
};

pub const TIMEOUT_MESSAGE: &str = "任务执行超时，已被调度器回收";
pub const RETRIES_EXHAUSTED_MESSAGE: &str = "超过最大重试次数";

/// 每个周期最多消费的结果消息数
const RESULT_BATCH: usize = 100;
const HEARTBEAT_BATCH: usize = 100;

/// 基于消息队列的调度器
///
/// 到期任务发布到优先级任务队列，由队列消费者执行并把结果发布到结果队列；
/// 本调度器负责回收超时任务、重试失败任务并根据结果更新任务状态。
pub struct QueueScheduler {
    tasks: Arc<dyn DiagnosisTaskRepository>,
    queue: Arc<dyn MessageQueue>,
    registry: Option<Arc<WorkerRegistry>>,
    reaper: StuckTaskReaper,
    config: QueueSchedulerConfig,
    loop_running: AtomicBool,
}

impl QueueScheduler {
    pub fn new(
        tasks: Arc<dyn DiagnosisTaskRepository>,
        queue: Arc<dyn MessageQueue>,
        config: QueueSchedulerConfig,
    ) -> Self {
        let reaper = StuckTaskReaper::new(
            tasks.clone(),
            RunningTasks::new(),
            (config.task_timeout_seconds / 60).max(1),
        )
        .presume_live();

        Self {
            tasks,
            queue,
            registry: None,
            reaper,
            config,
            loop_running: AtomicBool::new(false),
        }
    }

    /// 记录队列上的Worker心跳
    pub fn with_registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    fn task_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.task_timeout_seconds)
    }

    /// 运行时间超过上限的任务标记为失败，CRON任务顺便计算下次执行时间
    async fn fail_timed_out(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let expired = self
            .tasks
            .list_running_started_before(now - self.task_timeout())
            .await?;

        for task in &expired {
            warn!(task_id = task.id, "任务 {} 执行超时", task.name);
            self.tasks
                .update_status(task.id, TaskStatus::Failed, Some(TIMEOUT_MESSAGE))
                .await?;
            if let Some(next) = next_cron_run(task, now) {
                self.tasks.set_next_run_time(task.id, Some(next)).await?;
            }
        }
        Ok(expired.len())
    }

    /// 根据结果队列更新任务状态
    ///
    /// 状态写回成功才确认消息；写回失败的消息重新入队，本周期不再继续消费。
    async fn consume_results(&self) -> SchedulerResult<usize> {
        let mut processed = 0;
        while processed < RESULT_BATCH {
            let Some(delivery) = self.queue.next_result().await? else {
                break;
            };
            let task_id = delivery.message.task_id;
            match self.apply_result(&delivery.message).await {
                Ok(()) => {
                    self.queue.ack(delivery.delivery_tag).await?;
                    processed += 1;
                }
                Err(e) => {
                    error!(task_id, "处理任务结果失败，消息重新入队: {}", e);
                    self.queue.nack(delivery.delivery_tag, true).await?;
                    break;
                }
            }
        }
        Ok(processed)
    }

    async fn apply_result(&self, message: &TaskResultMessage) -> SchedulerResult<()> {
        let Some(task) = self.tasks.get_by_id(message.task_id).await? else {
            warn!(task_id = message.task_id, "结果对应的任务不存在");
            return Ok(());
        };

        match &message.result {
            ExecutionOutcome::Completed(summary) => {
                let success_count = i32::try_from(summary.success_count).unwrap_or(i32::MAX);
                self.tasks.record_completion(task.id, success_count).await?;
                if task.retry_count > 0 {
                    self.tasks.schedule_retry(task.id, 0, None).await?;
                }
                if let Some(next) = next_cron_run(&task, message.completed_at) {
                    self.tasks.set_next_run_time(task.id, Some(next)).await?;
                }
                info!(
                    task_id = task.id,
                    worker_id = %message.worker_id,
                    "任务 {} 执行完成, 成功 {} 项",
                    task.name,
                    summary.success_count
                );
            }
            ExecutionOutcome::Failed { error } if error.contains("任务已在运行中") => {
                debug!(task_id = task.id, "忽略重复投递的执行结果");
            }
            ExecutionOutcome::Failed { error } => {
                self.tasks
                    .update_status(task.id, TaskStatus::Failed, Some(error))
                    .await?;
                warn!(
                    task_id = task.id,
                    worker_id = %message.worker_id,
                    "任务 {} 执行失败: {}",
                    task.name,
                    error
                );
            }
        }
        Ok(())
    }

    async fn record_heartbeats(&self) -> SchedulerResult<()> {
        let Some(registry) = &self.registry else {
            return Ok(());
        };
        for _ in 0..HEARTBEAT_BATCH {
            let Some(message) = self.queue.next_heartbeat().await? else {
                break;
            };
            registry.record_broker_heartbeat(message).await;
        }
        Ok(())
    }

    /// 失败任务的重试
    ///
    /// 第n次重试在 `retry_backoff_minutes * n` 分钟后以提高的优先级重新发布，
    /// 超过最大次数后保持失败状态。
    async fn retry_failed(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let failed = self.tasks.list_by_status(TaskStatus::Failed).await?;
        let mut retried = 0;

        for task in failed.into_iter().filter(|t| t.is_active) {
            if task.retry_count >= self.config.max_retries {
                if task.error_message.as_deref() != Some(RETRIES_EXHAUSTED_MESSAGE) {
                    warn!(task_id = task.id, "任务 {} 超过最大重试次数", task.name);
                    self.tasks
                        .update_status(task.id, TaskStatus::Failed, Some(RETRIES_EXHAUSTED_MESSAGE))
                        .await?;
                }
                continue;
            }

            match task.next_retry_at {
                None => {
                    let attempt = task.retry_count + 1;
                    let at = now
                        + chrono::Duration::minutes(
                            self.config.retry_backoff_minutes * i64::from(attempt),
                        );
                    self.tasks.schedule_retry(task.id, attempt, Some(at)).await?;
                    info!(
                        task_id = task.id,
                        "任务 {} 将在 {} 进行第 {} 次重试",
                        task.name,
                        at.format("%H:%M:%S"),
                        attempt
                    );
                }
                Some(at) if at <= now => {
                    let priority = (dispatch_priority(&task, now) + 2).min(MAX_PRIORITY);
                    let message = TaskDispatchMessage::new(TaskPayload::from(&task), priority)
                        .with_retry_count(task.retry_count);
                    self.queue.publish_task(&message).await?;
                    self.tasks
                        .update_status(task.id, TaskStatus::Pending, None)
                        .await?;
                    self.tasks
                        .schedule_retry(task.id, task.retry_count, None)
                        .await?;
                    retried += 1;
                }
                Some(_) => {}
            }
        }
        Ok(retried)
    }

    async fn publish(&self, task: &DiagnosisTask, priority: u8, immediate: bool) -> SchedulerResult<()> {
        let mut message = TaskDispatchMessage::new(TaskPayload::from(task), priority);
        if immediate {
            message = message.immediate();
        }
        self.queue.publish_task(&message).await?;
        self.tasks
            .update_status(task.id, TaskStatus::Pending, None)
            .await?;
        debug!(task_id = task.id, "任务 {} 已发布, 优先级 {}", task.name, message.priority);
        Ok(())
    }

    async fn publish_due(&self, task: &DiagnosisTask, now: DateTime<Utc>) -> SchedulerResult<()> {
        let priority = dispatch_priority(task, now);
        if let Some(next) = next_run_after_dispatch(task, now, self.task_timeout()) {
            self.tasks.set_next_run_time(task.id, Some(next)).await?;
        }
        self.publish(task, priority, false).await
    }
}

#[async_trait]
impl SchedulerStrategy for QueueScheduler {
    fn name(&self) -> &'static str {
        "queue"
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.config.check_interval_seconds)
    }

    fn loop_flag(&self) -> &AtomicBool {
        &self.loop_running
    }

    #[instrument(skip(self))]
    async fn run_cycle(&self) -> SchedulerResult<CycleReport> {
        let now = Utc::now();
        let mut report = CycleReport {
            results_processed: self.consume_results().await?,
            ..Default::default()
        };
        if let Err(e) = self.record_heartbeats().await {
            warn!("读取队列心跳失败: {}", e);
        }
        report.timed_out = self.fail_timed_out(now).await?;
        report.retried = self.retry_failed(now).await?;

        let due: Vec<DiagnosisTask> = self
            .tasks
            .list_active()
            .await?
            .into_iter()
            .filter(|task| should_execute(task, now))
            .collect();

        for task in due {
            match self.publish_due(&task, now).await {
                Ok(()) => report.dispatched += 1,
                Err(e) => {
                    error!(task_id = task.id, "发布任务 {} 失败: {}", task.name, e);
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

        if report.dispatched + report.retried + report.timed_out > 0 {
            info!(
                "队列调度周期完成: 发布 {} 个, 重试 {} 个, 超时 {} 个, 结果 {} 条",
                report.dispatched, report.retried, report.timed_out, report.results_processed
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
        if task.is_running() {
            return Err(SchedulerError::TaskAlreadyRunning { id: task_id });
        }

        let priority = self.config.immediate_priority.min(MAX_PRIORITY);
        self.publish(&task, priority, true).await?;
        info!(task_id, "任务 {} 已提交到队列", task.name);
        Ok(SubmitOutcome::Queued { task_id, priority })
    }

    async fn recover_stuck_tasks(&self, force: bool) -> SchedulerResult<RecoveryReport> {
        self.reaper.run(force).await
    }

    async fn status(&self) -> SchedulerStatus {
        let running_tasks = match self.tasks.list_by_status(TaskStatus::Running).await {
            Ok(tasks) => tasks.iter().map(|t| t.id).collect(),
            Err(e) => {
                warn!("查询运行中任务失败: {}", e);
                Vec::new()
            }
        };
        SchedulerStatus {
            strategy: self.name().to_string(),
            pool_size: 0,
            available_slots: 0,
            running_tasks,
            in_dispatch: Vec::new(),
            scheduler_running: self.loop_running.load(Ordering::SeqCst),
        }
    }

    async fn queue_status(&self) -> SchedulerResult<Option<QueueStatus>> {
        Ok(Some(QueueStatus {
            task_queue: self.queue.task_queue_info().await?,
            result_queue: self.queue.result_queue_info().await?,
        }))
    }

    async fn drain(&self, _timeout: Duration) -> bool {
        true
    }
}
