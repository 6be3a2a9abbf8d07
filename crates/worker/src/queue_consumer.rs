//! 队列模式的任务消费者
//!
//! 从任务队列取出消息后标记任务为运行中、执行诊断并把结果发布到结果队列，
//! 任务行的最终状态由队列调度器根据结果消息更新。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use diagnosis_core::{
    models::{
        Delivery, ExecutionOutcome, HeartbeatMessage, HeartbeatSnapshot, TaskDispatchMessage,
        TaskResultMessage,
    },
    traits::{DiagnosisTaskRepository, MessageQueue},
    SchedulerResult,
};
use diagnosis_executor::{DiagnosisExecutor, RunningGuard, RunningTasks};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// 满载或重复投递时，消息退回队列前的等待时间
pub const REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// 单次取消息的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// 队列为空
    Idle,
    Started(i64),
    /// 满载或重复投递，消息已退回队列
    Requeued(i64),
}

#[derive(Clone)]
pub struct QueueConsumer {
    worker_id: String,
    queue: Arc<dyn MessageQueue>,
    tasks: Arc<dyn DiagnosisTaskRepository>,
    executor: Arc<DiagnosisExecutor>,
    max_concurrent_tasks: u32,
    requeue_delay: Duration,
    in_flight: RunningTasks,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl QueueConsumer {
    pub fn new(
        worker_id: impl Into<String>,
        queue: Arc<dyn MessageQueue>,
        tasks: Arc<dyn DiagnosisTaskRepository>,
        executor: Arc<DiagnosisExecutor>,
        max_concurrent_tasks: u32,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            tasks,
            executor,
            max_concurrent_tasks: max_concurrent_tasks.max(1),
            requeue_delay: REQUEUE_DELAY,
            in_flight: RunningTasks::new(),
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_requeue_delay(mut self, delay: Duration) -> Self {
        self.requeue_delay = delay;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn in_flight(&self) -> &RunningTasks {
        &self.in_flight
    }

    fn at_capacity(&self) -> bool {
        self.in_flight.len() >= self.max_concurrent_tasks as usize
    }

    /// 取一条任务消息并在后台执行
    pub async fn process_next(&self) -> SchedulerResult<ConsumeOutcome> {
        let Some(delivery) = self.queue.next_task().await? else {
            return Ok(ConsumeOutcome::Idle);
        };
        let task_id = delivery.message.task_id;

        if self.at_capacity() {
            debug!("消费者 {} 已满载，任务 {} 退回队列", self.worker_id, task_id);
            return self.requeue(delivery.delivery_tag, task_id).await;
        }
        let Some(guard) = self.in_flight.try_acquire(task_id) else {
            warn!("任务 {} 已在本节点执行，消息退回队列", task_id);
            return self.requeue(delivery.delivery_tag, task_id).await;
        };

        if delivery.redelivered {
            info!("任务 {} 为重新投递的消息", task_id);
        }

        let consumer = self.clone();
        tokio::spawn(async move {
            consumer.handle(delivery, guard).await;
        });
        Ok(ConsumeOutcome::Started(task_id))
    }

    /// 稍等片刻再退回，避免同一条消息立即被反复取出
    async fn requeue(&self, delivery_tag: u64, task_id: i64) -> SchedulerResult<ConsumeOutcome> {
        tokio::time::sleep(self.requeue_delay).await;
        self.queue.nack(delivery_tag, true).await?;
        Ok(ConsumeOutcome::Requeued(task_id))
    }

    async fn handle(&self, delivery: Delivery<TaskDispatchMessage>, _guard: RunningGuard) {
        let message = delivery.message;
        let task_id = message.task_id;

        let outcome = match self.tasks.mark_running(task_id, Utc::now()).await {
            Ok(()) => self.executor.execute_payload(&message.data).await,
            Err(e) => {
                error!("标记任务 {} 运行中失败: {}", task_id, e);
                ExecutionOutcome::failed(e.to_string())
            }
        };

        if outcome.is_success() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }

        let result = TaskResultMessage {
            task_id,
            worker_id: self.worker_id.clone(),
            result: outcome,
            completed_at: Utc::now(),
        };

        let settle = match self.queue.publish_result(&result).await {
            Ok(()) => self.queue.ack(delivery.delivery_tag).await,
            Err(e) => {
                error!("发布任务 {} 结果失败，消息退回队列: {}", task_id, e);
                self.queue.nack(delivery.delivery_tag, true).await
            }
        };
        if let Err(e) = settle {
            error!("确认任务 {} 消息失败: {}", task_id, e);
        }
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            current_tasks: Some(u32::try_from(self.in_flight.len()).unwrap_or(u32::MAX)),
            running_task_ids: self.in_flight.snapshot(),
            status: Some("online".to_string()),
            tasks_completed: self.completed.load(Ordering::Relaxed),
            tasks_failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub async fn publish_heartbeat(&self) -> SchedulerResult<()> {
        self.queue
            .publish_heartbeat(&HeartbeatMessage {
                worker_id: self.worker_id.clone(),
                timestamp: Utc::now(),
                info: self.snapshot(),
            })
            .await
    }

    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// 消费循环；收到关闭信号后停止取消息并等待执行中的任务
    pub async fn run(
        self,
        poll_interval: Duration,
        heartbeat_interval: Duration,
        drain_timeout: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(
            "队列消费者 {} 启动，最大并发 {}",
            self.worker_id, self.max_concurrent_tasks
        );
        let mut poll_ticker = interval(poll_interval);
        let mut heartbeat_ticker = interval(heartbeat_interval);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = heartbeat_ticker.tick() => {
                    if let Err(e) = self.publish_heartbeat().await {
                        warn!("发布心跳失败: {}", e);
                    }
                }
                _ = poll_ticker.tick() => loop {
                    match self.process_next().await {
                        Ok(ConsumeOutcome::Started(_)) => continue,
                        Ok(_) => break,
                        Err(e) => {
                            error!("消费任务消息失败: {}", e);
                            break;
                        }
                    }
                },
            }
        }

        if !self.drain(drain_timeout).await {
            warn!("队列消费者 {} 退出时仍有任务在执行", self.worker_id);
        }
        info!("队列消费者 {} 已停止", self.worker_id);
    }
}
