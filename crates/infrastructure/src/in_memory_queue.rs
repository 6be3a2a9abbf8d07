use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use async_trait::async_trait;
use diagnosis_core::{
    models::{
        Delivery, HeartbeatMessage, QueueInfo, TaskDispatchMessage, TaskResultMessage,
        MAX_PRIORITY,
    },
    traits::MessageQueue,
    Result, SchedulerError,
};
use tokio::sync::Mutex;
use tracing::debug;

/// 内存消息队列实现
///
/// 适用于单机嵌入式部署与测试。任务队列按优先级出队，同优先级先进先出；
/// 取出但未确认的任务与结果消息保存在待确认表中，`nack(requeue)` 时放回队列。
#[derive(Debug)]
pub struct InMemoryMessageQueue {
    task_queue_name: String,
    result_queue_name: String,
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    tasks: BinaryHeap<Prioritized>,
    unacked: HashMap<u64, Unacked>,
    results: VecDeque<QueuedResult>,
    heartbeats: VecDeque<HeartbeatMessage>,
    next_seq: u64,
    next_tag: u64,
}

#[derive(Debug, Clone)]
struct Prioritized {
    priority: u8,
    seq: u64,
    redelivered: bool,
    message: TaskDispatchMessage,
}

#[derive(Debug, Clone)]
struct QueuedResult {
    redelivered: bool,
    message: TaskResultMessage,
}

#[derive(Debug)]
enum Unacked {
    Task(Prioritized),
    Result(QueuedResult),
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Prioritized {}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageQueue {
    pub fn new() -> Self {
        Self::with_names("diagnosis.tasks", "task.results")
    }

    pub fn with_names(task_queue: impl Into<String>, result_queue: impl Into<String>) -> Self {
        Self {
            task_queue_name: task_queue.into(),
            result_queue_name: result_queue.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// 待确认消息数量
    pub async fn unacked_count(&self) -> usize {
        self.state.lock().await.unacked.len()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_task(&self, message: &TaskDispatchMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.tasks.push(Prioritized {
            priority: message.priority.min(MAX_PRIORITY),
            seq,
            redelivered: false,
            message: message.clone(),
        });
        debug!("任务 {} 已进入内存队列，优先级 {}", message.task_id, message.priority);
        Ok(())
    }

    async fn next_task(&self) -> Result<Option<Delivery<TaskDispatchMessage>>> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.tasks.pop() else {
            return Ok(None);
        };
        state.next_tag += 1;
        let tag = state.next_tag;
        let delivery = Delivery {
            delivery_tag: tag,
            redelivered: entry.redelivered,
            message: entry.message.clone(),
        };
        state.unacked.insert(tag, Unacked::Task(entry));
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .unacked
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::MessageQueue(format!("未知的投递标签: {delivery_tag}")))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state.unacked.remove(&delivery_tag).ok_or_else(|| {
            SchedulerError::MessageQueue(format!("未知的投递标签: {delivery_tag}"))
        })?;
        if !requeue {
            return Ok(());
        }
        match entry {
            Unacked::Task(mut task) => {
                task.redelivered = true;
                state.tasks.push(task);
            }
            Unacked::Result(mut result) => {
                result.redelivered = true;
                state.results.push_front(result);
            }
        }
        Ok(())
    }

    async fn publish_result(&self, message: &TaskResultMessage) -> Result<()> {
        self.state.lock().await.results.push_back(QueuedResult {
            redelivered: false,
            message: message.clone(),
        });
        Ok(())
    }

    async fn next_result(&self) -> Result<Option<Delivery<TaskResultMessage>>> {
        let mut state = self.state.lock().await;
        let Some(entry) = state.results.pop_front() else {
            return Ok(None);
        };
        state.next_tag += 1;
        let tag = state.next_tag;
        let delivery = Delivery {
            delivery_tag: tag,
            redelivered: entry.redelivered,
            message: entry.message.clone(),
        };
        state.unacked.insert(tag, Unacked::Result(entry));
        Ok(Some(delivery))
    }

    async fn publish_heartbeat(&self, message: &HeartbeatMessage) -> Result<()> {
        self.state.lock().await.heartbeats.push_back(message.clone());
        Ok(())
    }

    async fn next_heartbeat(&self) -> Result<Option<HeartbeatMessage>> {
        Ok(self.state.lock().await.heartbeats.pop_front())
    }

    async fn task_queue_info(&self) -> Result<QueueInfo> {
        let state = self.state.lock().await;
        Ok(QueueInfo {
            name: self.task_queue_name.clone(),
            message_count: state.tasks.len() as u32,
            consumer_count: 0,
        })
    }

    async fn result_queue_info(&self) -> Result<QueueInfo> {
        let state = self.state.lock().await;
        Ok(QueueInfo {
            name: self.result_queue_name.clone(),
            message_count: state.results.len() as u32,
            consumer_count: 0,
        })
    }
}
