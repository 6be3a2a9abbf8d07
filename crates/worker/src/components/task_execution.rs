use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use diagnosis_core::models::{
    CompletionReport, ExecutionOutcome, HeartbeatSnapshot, TaskPayload,
};
use diagnosis_executor::{DiagnosisExecutor, RunningTasks};
use tracing::{error, info, warn};

use super::RegistrationSession;

/// 提交结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Started,
    /// 该任务已在本节点执行
    Duplicate,
    AtCapacity,
}

/// 本节点的任务执行管理
///
/// 并发执行数不超过声明的 `max_concurrent_tasks`，同一任务不会被重复计数。
pub struct TaskExecutionManager {
    worker_id: String,
    executor: Arc<DiagnosisExecutor>,
    session: Arc<RegistrationSession>,
    max_concurrent_tasks: u32,
    in_flight: RunningTasks,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl TaskExecutionManager {
    pub fn new(
        executor: Arc<DiagnosisExecutor>,
        session: Arc<RegistrationSession>,
        max_concurrent_tasks: u32,
    ) -> Self {
        Self {
            worker_id: session.node_id().to_string(),
            executor,
            session,
            max_concurrent_tasks,
            in_flight: RunningTasks::new(),
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current_task_count(&self) -> u32 {
        u32::try_from(self.in_flight.len()).unwrap_or(u32::MAX)
    }

    pub fn available_slots(&self) -> u32 {
        self.max_concurrent_tasks
            .saturating_sub(self.current_task_count())
    }

    pub fn is_running(&self, task_id: i64) -> bool {
        self.in_flight.contains(task_id)
    }

    pub fn submit(&self, payload: TaskPayload) -> Admission {
        if self.in_flight.contains(payload.task_id) {
            return Admission::Duplicate;
        }
        if self.available_slots() == 0 {
            return Admission::AtCapacity;
        }
        let Some(guard) = self.in_flight.try_acquire(payload.task_id) else {
            return Admission::Duplicate;
        };

        let executor = self.executor.clone();
        let session = self.session.clone();
        let worker_id = self.worker_id.clone();
        let completed = self.completed.clone();
        let failed = self.failed.clone();

        tokio::spawn(async move {
            let task_id = payload.task_id;
            info!(task_id, worker_id = %worker_id, "开始执行任务 {}", payload.name);
            let outcome = executor.execute_payload(&payload).await;

            let report = completion_report(&worker_id, &outcome);
            if report.success {
                completed.fetch_add(1, Ordering::Relaxed);
            } else {
                failed.fetch_add(1, Ordering::Relaxed);
            }
            if let Err(e) = session.report_completion(task_id, &report).await {
                error!(task_id, "上报任务完成失败: {}", e);
            }
            drop(guard);
        });

        Admission::Started
    }

    pub fn snapshot(&self) -> HeartbeatSnapshot {
        HeartbeatSnapshot {
            current_tasks: Some(self.current_task_count()),
            running_task_ids: self.in_flight.snapshot(),
            status: Some("online".to_string()),
            tasks_completed: self.completed.load(Ordering::Relaxed),
            tasks_failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// 等待执行中的任务结束
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while !self.in_flight.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!("仍有 {} 个任务在执行", self.in_flight.len());
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

pub(crate) fn completion_report(worker_id: &str, outcome: &ExecutionOutcome) -> CompletionReport {
    match outcome {
        ExecutionOutcome::Completed(summary) => CompletionReport {
            worker_id: worker_id.to_string(),
            success: true,
            result: serde_json::to_value(summary).ok(),
            error_message: None,
        },
        ExecutionOutcome::Failed { error } => CompletionReport {
            worker_id: worker_id.to_string(),
            success: false,
            result: None,
            error_message: Some(error.clone()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnosis_core::models::ExecutionSummary;

    #[test]
    fn test_completion_report_carries_summary() {
        let ok = completion_report(
            "node-a",
            &ExecutionOutcome::Completed(ExecutionSummary {
                success: true,
                results_count: 2,
                success_count: 2,
                error_count: 0,
            }),
        );
        assert!(ok.success);
        assert_eq!(ok.result.unwrap()["success_count"], 2);

        let failed = completion_report("node-a", &ExecutionOutcome::failed("没有找到可用的摄像头"));
        assert!(!failed.success);
        assert_eq!(failed.error_message.as_deref(), Some("没有找到可用的摄像头"));
    }
}
