use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use diagnosis_core::{
    models::{DiagnosisTask, TaskStatus},
    traits::DiagnosisTaskRepository,
    SchedulerResult,
};
use diagnosis_executor::RunningTasks;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::registry::WorkerRegistry;

/// 一个被重置任务的明细
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResetDetail {
    pub task_id: i64,
    pub name: String,
    pub reason: String,
}

/// 一次回收的结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecoveryReport {
    pub checked: usize,
    pub reset: usize,
    pub reset_ids: Vec<i64>,
    pub details: Vec<ResetDetail>,
}

/// 卡住任务回收器
///
/// 对每个RUNNING任务核对执行器运行集合与存活Worker，再按最后运行时间判断是否超时，
/// 命中的任务重置为PENDING等待重新调度。重复执行是幂等的。
pub struct StuckTaskReaper {
    tasks: Arc<dyn DiagnosisTaskRepository>,
    running: RunningTasks,
    registry: Option<Arc<WorkerRegistry>>,
    presume_live: bool,
    timeout: Duration,
}

impl StuckTaskReaper {
    pub fn new(
        tasks: Arc<dyn DiagnosisTaskRepository>,
        running: RunningTasks,
        timeout_minutes: i64,
    ) -> Self {
        Self {
            tasks,
            running,
            registry: None,
            presume_live: false,
            timeout: Duration::minutes(timeout_minutes),
        }
    }

    /// 存活Worker的当前任务集合中包含的任务视为仍在执行
    pub fn with_registry(mut self, registry: Arc<WorkerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 所有RUNNING任务都视为被某个消费者持有，只按运行时长回收
    pub fn presume_live(mut self) -> Self {
        self.presume_live = true;
        self
    }

    pub async fn run(&self, force: bool) -> SchedulerResult<RecoveryReport> {
        let now = Utc::now();
        let running_tasks = self.tasks.list_by_status(TaskStatus::Running).await?;
        let mut report = RecoveryReport {
            checked: running_tasks.len(),
            ..Default::default()
        };

        for task in running_tasks {
            let reason = if force {
                Some("强制重置".to_string())
            } else {
                let live = self.is_live(&task).await;
                stuck_reason(&task, live, now, self.timeout)
            };
            let Some(reason) = reason else {
                continue;
            };

            match self.tasks.reset_to_pending(task.id).await {
                Ok(()) => {
                    warn!(task_id = task.id, "重置卡住的任务 {}: {}", task.name, reason);
                    report.reset_ids.push(task.id);
                    report.details.push(ResetDetail {
                        task_id: task.id,
                        name: task.name,
                        reason,
                    });
                }
                Err(e) => warn!(task_id = task.id, "重置任务失败: {}", e),
            }
        }

        report.reset = report.reset_ids.len();
        if report.reset > 0 {
            info!(
                "卡住任务回收完成: 检查 {} 个, 重置 {} 个",
                report.checked, report.reset
            );
        }
        Ok(report)
    }

    async fn is_live(&self, task: &DiagnosisTask) -> bool {
        if self.presume_live || self.running.contains(task.id) {
            return true;
        }
        match (&self.registry, task.assigned_worker.as_deref()) {
            (Some(registry), Some(worker_id)) => registry.holds_task(worker_id, task.id).await,
            _ => false,
        }
    }
}

/// 判断RUNNING任务是否卡住，返回重置原因
pub fn stuck_reason(
    task: &DiagnosisTask,
    live: bool,
    now: DateTime<Utc>,
    timeout: Duration,
) -> Option<String> {
    if !live {
        return Some("任务不在执行器运行列表中".to_string());
    }
    if !task.is_recurring() {
        return None;
    }
    let Some(last_run) = task.last_run_time.or(task.started_at) else {
        return Some("任务无最后运行时间记录".to_string());
    };
    let elapsed = now - last_run;
    (elapsed > timeout).then(|| format!("任务运行时间过长 ({}分钟)", elapsed.num_minutes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnosis_testing_utils::DiagnosisTaskBuilder;

    #[test]
    fn test_stuck_reason() {
        let now = Utc::now();
        let timeout = Duration::minutes(30);
        let running = |b: DiagnosisTaskBuilder| b.with_status(TaskStatus::Running).build();

        let orphan = running(DiagnosisTaskBuilder::new().last_run_at(now));
        assert_eq!(
            stuck_reason(&orphan, false, now, timeout).as_deref(),
            Some("任务不在执行器运行列表中")
        );

        let fresh = running(DiagnosisTaskBuilder::new().last_run_at(now - Duration::minutes(5)));
        assert_eq!(stuck_reason(&fresh, true, now, timeout), None);

        let old = running(DiagnosisTaskBuilder::new().last_run_at(now - Duration::minutes(45)));
        assert_eq!(
            stuck_reason(&old, true, now, timeout).as_deref(),
            Some("任务运行时间过长 (45分钟)")
        );

        let never = running(DiagnosisTaskBuilder::new().every_minutes(10));
        assert_eq!(
            stuck_reason(&never, true, now, timeout).as_deref(),
            Some("任务无最后运行时间记录")
        );

        let once = running(
            DiagnosisTaskBuilder::new()
                .once()
                .last_run_at(now - Duration::hours(3)),
        );
        assert_eq!(stuck_reason(&once, true, now, timeout), None);
    }
}
