use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 注册请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRegistration {
    pub node_id: String,
    #[serde(default)]
    pub node_name: Option<String>,
    pub max_concurrent_tasks: u32,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// 心跳时上报的状态快照
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatSnapshot {
    #[serde(default)]
    pub current_tasks: Option<u32>,
    #[serde(default)]
    pub running_task_ids: Vec<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub tasks_failed: u64,
}

/// Worker在线状态，由心跳时间推导
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
}

/// 注册表中的Worker节点记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerNode {
    pub node_id: String,
    pub node_name: String,
    pub max_concurrent_tasks: u32,
    pub capabilities: Vec<String>,
    pub current_tasks: u32,
    pub task_ids: BTreeSet<i64>,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub total_assigned: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub last_snapshot: Option<HeartbeatSnapshot>,
}

impl WorkerNode {
    pub fn from_registration(registration: WorkerRegistration, now: DateTime<Utc>) -> Self {
        let node_name = registration
            .node_name
            .unwrap_or_else(|| registration.node_id.clone());
        Self {
            node_id: registration.node_id,
            node_name,
            max_concurrent_tasks: registration.max_concurrent_tasks,
            capabilities: registration.capabilities,
            current_tasks: 0,
            task_ids: BTreeSet::new(),
            last_heartbeat: now,
            registered_at: now,
            total_assigned: 0,
            total_completed: 0,
            total_failed: 0,
            last_snapshot: None,
        }
    }

    /// 心跳是否在存活窗口内
    pub fn is_alive(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        now - self.last_heartbeat <= liveness_window
    }

    pub fn has_capacity(&self) -> bool {
        self.current_tasks < self.max_concurrent_tasks
    }

    pub fn status(&self, now: DateTime<Utc>, liveness_window: Duration) -> WorkerStatus {
        if self.is_alive(now, liveness_window) {
            WorkerStatus::Online
        } else {
            WorkerStatus::Offline
        }
    }

    /// 负载百分比
    pub fn load_percentage(&self) -> f64 {
        if self.max_concurrent_tasks == 0 {
            return 100.0;
        }
        f64::from(self.current_tasks) / f64::from(self.max_concurrent_tasks) * 100.0
    }
}

/// Worker列表视图
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerView {
    #[serde(flatten)]
    pub node: WorkerNode,
    pub status: WorkerStatus,
    pub load_percentage: f64,
}

/// Worker统计
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStats {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub total_capacity: u32,
    pub current_tasks: u32,
}

/// Worker上报的执行完成结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionReport {
    pub worker_id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error_message: Option<String>,
}
