use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ExecutionOutcome, HeartbeatSnapshot, TaskPayload};

/// 任务消息的默认优先级
pub const BASE_PRIORITY: u8 = 5;
/// 队列支持的最高优先级
pub const MAX_PRIORITY: u8 = 10;

/// 发布到任务队列的诊断任务消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDispatchMessage {
    pub task_id: i64,
    pub task_type: String,
    pub data: TaskPayload,
    pub priority: u8,
    /// 手动提交而非调度触发
    #[serde(default)]
    pub immediate: bool,
    #[serde(default)]
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
}

impl TaskDispatchMessage {
    pub fn new(data: TaskPayload, priority: u8) -> Self {
        Self {
            task_id: data.task_id,
            task_type: "diagnosis".to_string(),
            data,
            priority: priority.min(MAX_PRIORITY),
            immediate: false,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn with_retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// 结果队列中的执行结果消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResultMessage {
    pub task_id: i64,
    pub worker_id: String,
    pub result: ExecutionOutcome,
    pub completed_at: DateTime<Utc>,
}

/// 心跳广播消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatMessage {
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
    pub info: HeartbeatSnapshot,
}

/// 从队列取出的一条待确认消息
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<T> {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub message: T,
}

/// 队列状态
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueInfo {
    pub name: String,
    pub message_count: u32,
    pub consumer_count: u32,
}
