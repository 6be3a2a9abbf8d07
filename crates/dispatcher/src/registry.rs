use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use diagnosis_core::{
    models::{
        CompletionReport, HeartbeatMessage, HeartbeatSnapshot, TaskPayload, TaskStatus,
        WorkerNode, WorkerRegistration, WorkerStats, WorkerStatus, WorkerView,
    },
    traits::DiagnosisTaskRepository,
    SchedulerError, SchedulerResult,
};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::schedule::next_cron_run;

/// Worker注册表与心跳跟踪
///
/// 在线状态只由心跳时间推导，注册表不会主动回收Worker上的任务；
/// Worker失联后其任务停留在RUNNING，由卡住任务回收器处理。
pub struct WorkerRegistry {
    workers: RwLock<BTreeMap<String, WorkerNode>>,
    tasks: Arc<dyn DiagnosisTaskRepository>,
    liveness: Duration,
}

impl WorkerRegistry {
    pub fn new(tasks: Arc<dyn DiagnosisTaskRepository>, liveness_seconds: i64) -> Self {
        Self {
            workers: RwLock::new(BTreeMap::new()),
            tasks,
            liveness: Duration::seconds(liveness_seconds),
        }
    }

    /// 注册Worker，重复注册会清空当前任务记录但保留累计计数
    #[instrument(skip(self, registration), fields(worker_id = %registration.node_id))]
    pub async fn register(&self, registration: WorkerRegistration) -> SchedulerResult<String> {
        if registration.node_id.trim().is_empty() {
            return Err(SchedulerError::InvalidTaskParams(
                "node_id不能为空".to_string(),
            ));
        }
        if registration.max_concurrent_tasks == 0 {
            return Err(SchedulerError::InvalidTaskParams(
                "max_concurrent_tasks必须大于0".to_string(),
            ));
        }

        let now = Utc::now();
        let node_id = registration.node_id.clone();
        let mut workers = self.workers.write().await;
        match workers.get_mut(&node_id) {
            Some(existing) => {
                let fresh = WorkerNode::from_registration(registration, now);
                existing.node_name = fresh.node_name;
                existing.max_concurrent_tasks = fresh.max_concurrent_tasks;
                existing.capabilities = fresh.capabilities;
                existing.current_tasks = 0;
                existing.task_ids.clear();
                existing.last_heartbeat = now;
                info!("Worker {} 重新注册", node_id);
            }
            None => {
                workers.insert(
                    node_id.clone(),
                    WorkerNode::from_registration(registration, now),
                );
                info!("Worker {} 注册成功", node_id);
            }
        }
        Ok(node_id)
    }

    /// 更新心跳，未注册的Worker返回 `WorkerNotFound`
    pub async fn heartbeat(&self, node_id: &str, snapshot: HeartbeatSnapshot) -> SchedulerResult<()> {
        let mut workers = self.workers.write().await;
        let node = workers
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: node_id.to_string(),
            })?;

        node.last_heartbeat = Utc::now();
        if let Some(current) = snapshot.current_tasks {
            node.current_tasks = current;
            node.task_ids = snapshot.running_task_ids.iter().copied().collect();
        }
        node.last_snapshot = Some(snapshot);
        debug!("收到Worker {} 的心跳", node_id);
        Ok(())
    }

    /// 记录从消息队列收到的心跳，未注册的Worker忽略
    pub async fn record_broker_heartbeat(&self, message: HeartbeatMessage) {
        match self.heartbeat(&message.worker_id, message.info).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("忽略未注册Worker {} 的队列心跳", message.worker_id);
            }
            Err(e) => warn!("处理队列心跳失败: {}", e),
        }
    }

    pub async fn unregister(&self, node_id: &str) -> SchedulerResult<()> {
        self.workers
            .write()
            .await
            .remove(node_id)
            .map(|_| info!("Worker {} 已注销", node_id))
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: node_id.to_string(),
            })
    }

    /// 第一个心跳新鲜且有空闲容量的Worker
    pub async fn find_available_worker(&self) -> Option<String> {
        let now = Utc::now();
        self.workers
            .read()
            .await
            .values()
            .find(|node| node.is_alive(now, self.liveness) && node.has_capacity())
            .map(|node| node.node_id.clone())
    }

    pub async fn is_alive(&self, node_id: &str) -> bool {
        let now = Utc::now();
        self.workers
            .read()
            .await
            .get(node_id)
            .is_some_and(|node| node.is_alive(now, self.liveness))
    }

    /// Worker在线且其当前任务集合包含该任务
    pub async fn holds_task(&self, node_id: &str, task_id: i64) -> bool {
        let now = Utc::now();
        self.workers
            .read()
            .await
            .get(node_id)
            .is_some_and(|node| {
                node.is_alive(now, self.liveness) && node.task_ids.contains(&task_id)
            })
    }

    /// 把任务委派给Worker并计入其当前任务数
    pub async fn assign_task(&self, task_id: i64, node_id: &str) -> SchedulerResult<()> {
        self.tasks.assign_to_worker(task_id, node_id).await?;

        let mut workers = self.workers.write().await;
        let node = workers
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::WorkerNotFound {
                id: node_id.to_string(),
            })?;
        if node.task_ids.insert(task_id) {
            node.current_tasks += 1;
            node.total_assigned += 1;
        }
        info!("任务 {} 已委派给Worker {}", task_id, node_id);
        Ok(())
    }

    /// Worker领取任务
    ///
    /// 先领取已委派给该Worker的任务，再领取未分配的任务；已计入的任务不会重复计数。
    #[instrument(skip(self))]
    pub async fn fetch_tasks(
        &self,
        node_id: &str,
        batch_size: usize,
    ) -> SchedulerResult<Vec<TaskPayload>> {
        if !self.workers.read().await.contains_key(node_id) {
            return Err(SchedulerError::WorkerNotFound {
                id: node_id.to_string(),
            });
        }

        let now = Utc::now();
        let claimed = self
            .tasks
            .claim_pending(node_id, batch_size.max(1), now)
            .await?;

        for task in &claimed {
            self.tasks.mark_running(task.id, now).await?;
        }

        let mut workers = self.workers.write().await;
        if let Some(node) = workers.get_mut(node_id) {
            for task in &claimed {
                if node.task_ids.insert(task.id) {
                    node.current_tasks += 1;
                    node.total_assigned += 1;
                }
            }
        }

        if !claimed.is_empty() {
            info!("Worker {} 领取了 {} 个任务", node_id, claimed.len());
        }
        Ok(claimed.iter().map(TaskPayload::from).collect())
    }

    /// Worker回报执行完成
    #[instrument(skip(self, report), fields(worker_id = %report.worker_id, success = report.success))]
    pub async fn complete_task(&self, task_id: i64, report: CompletionReport) -> SchedulerResult<()> {
        let task = self
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id: task_id })?;

        if report.success {
            let success_count = report
                .result
                .as_ref()
                .and_then(|r| r.get("success_count"))
                .and_then(serde_json::Value::as_i64)
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(0);
            self.tasks.record_completion(task_id, success_count).await?;
            if let Some(next) = next_cron_run(&task, Utc::now()) {
                self.tasks.set_next_run_time(task_id, Some(next)).await?;
            }
        } else {
            let error = report
                .error_message
                .as_deref()
                .unwrap_or("Worker执行失败");
            self.tasks
                .update_status(task_id, TaskStatus::Failed, Some(error))
                .await?;
        }

        let mut workers = self.workers.write().await;
        match workers.get_mut(&report.worker_id) {
            Some(node) => {
                if node.task_ids.remove(&task_id) {
                    node.current_tasks = node.current_tasks.saturating_sub(1);
                }
                if report.success {
                    node.total_completed += 1;
                } else {
                    node.total_failed += 1;
                }
            }
            None => warn!(
                "完成任务 {} 的Worker {} 未注册",
                task_id, report.worker_id
            ),
        }

        info!(
            "任务 {} 由Worker {} 执行完成, 成功: {}",
            task_id, report.worker_id, report.success
        );
        Ok(())
    }

    pub async fn list_workers(&self) -> Vec<WorkerView> {
        let now = Utc::now();
        self.workers
            .read()
            .await
            .values()
            .map(|node| WorkerView {
                status: node.status(now, self.liveness),
                load_percentage: node.load_percentage(),
                node: node.clone(),
            })
            .collect()
    }

    pub async fn stats(&self) -> WorkerStats {
        let views = self.list_workers().await;
        let online = views
            .iter()
            .filter(|v| v.status == WorkerStatus::Online)
            .count();
        WorkerStats {
            total: views.len(),
            online,
            offline: views.len() - online,
            total_capacity: views.iter().map(|v| v.node.max_concurrent_tasks).sum(),
            current_tasks: views.iter().map(|v| v.node.current_tasks).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnosis_infrastructure::InMemoryTaskRepository;
    use diagnosis_testing_utils::{DiagnosisTaskBuilder, WorkerRegistrationBuilder};

    fn registry() -> (Arc<InMemoryTaskRepository>, WorkerRegistry) {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        (tasks.clone(), WorkerRegistry::new(tasks, 180))
    }

    #[tokio::test]
    async fn test_reregister_resets_current_but_keeps_totals() {
        let (tasks, registry) = registry();
        tasks.insert(DiagnosisTaskBuilder::new().with_id(1).build()).await;
        registry
            .register(WorkerRegistrationBuilder::new("node-a").capacity(2).build())
            .await
            .unwrap();

        registry.assign_task(1, "node-a").await.unwrap();
        registry
            .complete_task(
                1,
                CompletionReport {
                    worker_id: "node-a".to_string(),
                    success: true,
                    result: None,
                    error_message: None,
                },
            )
            .await
            .unwrap();
        tasks.insert(DiagnosisTaskBuilder::new().with_id(2).build()).await;
        registry.assign_task(2, "node-a").await.unwrap();

        registry
            .register(WorkerRegistrationBuilder::new("node-a").capacity(4).build())
            .await
            .unwrap();

        let node = &registry.list_workers().await[0].node;
        assert_eq!(node.current_tasks, 0);
        assert!(node.task_ids.is_empty());
        assert_eq!(node.max_concurrent_tasks, 4);
        assert_eq!(node.total_assigned, 2);
        assert_eq!(node.total_completed, 1);
    }

    #[tokio::test]
    async fn test_holds_task_follows_heartbeat_task_ids() {
        let (tasks, registry) = registry();
        tasks.insert(DiagnosisTaskBuilder::new().with_id(1).build()).await;
        registry
            .register(WorkerRegistrationBuilder::new("node-a").capacity(2).build())
            .await
            .unwrap();
        assert!(!registry.holds_task("node-a", 1).await);

        registry.assign_task(1, "node-a").await.unwrap();
        assert!(registry.holds_task("node-a", 1).await);

        registry
            .heartbeat(
                "node-a",
                HeartbeatSnapshot {
                    current_tasks: Some(1),
                    running_task_ids: vec![7],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!registry.holds_task("node-a", 1).await);
        assert!(registry.holds_task("node-a", 7).await);
        assert!(!registry.holds_task("ghost", 7).await);
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_worker_is_not_found() {
        let (_, registry) = registry();
        let err = registry
            .heartbeat("ghost", HeartbeatSnapshot::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::WorkerNotFound { .. }));
        assert!(registry.unregister("ghost").await.is_err());
    }

    #[tokio::test]
    async fn test_find_available_worker_requires_capacity_and_fresh_heartbeat() {
        let (tasks, registry) = registry();
        assert!(registry.find_available_worker().await.is_none());

        registry
            .register(WorkerRegistrationBuilder::new("node-a").capacity(1).build())
            .await
            .unwrap();
        assert_eq!(registry.find_available_worker().await.as_deref(), Some("node-a"));

        tasks.insert(DiagnosisTaskBuilder::new().with_id(1).build()).await;
        registry.assign_task(1, "node-a").await.unwrap();
        assert!(registry.find_available_worker().await.is_none());

        registry
            .register(WorkerRegistrationBuilder::new("node-b").capacity(1).build())
            .await
            .unwrap();
        registry.workers.write().await.get_mut("node-b").unwrap().last_heartbeat =
            Utc::now() - Duration::seconds(181);
        assert!(registry.find_available_worker().await.is_none());

        let stats = registry.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.online, 1);
        assert_eq!(stats.offline, 1);
        assert_eq!(stats.total_capacity, 2);
        assert_eq!(stats.current_tasks, 1);
    }

    #[tokio::test]
    async fn test_fetch_does_not_double_count_delegated_task() {
        let (tasks, registry) = registry();
        tasks.insert(DiagnosisTaskBuilder::new().with_id(1).build()).await;
        tasks.insert(DiagnosisTaskBuilder::new().with_id(2).build()).await;
        registry
            .register(WorkerRegistrationBuilder::new("node-a").capacity(3).build())
            .await
            .unwrap();

        registry.assign_task(2, "node-a").await.unwrap();
        let payloads = registry.fetch_tasks("node-a", 5).await.unwrap();
        let ids: Vec<i64> = payloads.iter().map(|p| p.task_id).collect();
        assert_eq!(ids, vec![1, 2]);

        let node = &registry.list_workers().await[0].node;
        assert_eq!(node.current_tasks, 2);

        let task = tasks.get_by_id(2).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.total_runs, 1);
        assert!(task.last_run_time.is_some());

        assert!(registry.fetch_tasks("ghost", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_complete_task_failure_and_cron_next_run() {
        let (tasks, registry) = registry();
        tasks
            .insert(DiagnosisTaskBuilder::new().with_id(1).cron("*/5 * * * *").build())
            .await;
        tasks.insert(DiagnosisTaskBuilder::new().with_id(2).build()).await;
        registry
            .register(WorkerRegistrationBuilder::new("node-a").capacity(2).build())
            .await
            .unwrap();
        registry.fetch_tasks("node-a", 2).await.unwrap();

        registry
            .complete_task(
                1,
                CompletionReport {
                    worker_id: "node-a".to_string(),
                    success: true,
                    result: Some(serde_json::json!({"success": true, "success_count": 3})),
                    error_message: None,
                },
            )
            .await
            .unwrap();
        registry
            .complete_task(
                2,
                CompletionReport {
                    worker_id: "node-a".to_string(),
                    success: false,
                    result: None,
                    error_message: Some("图像获取失败".to_string()),
                },
            )
            .await
            .unwrap();

        let cron_task = tasks.get_by_id(1).await.unwrap().unwrap();
        assert_eq!(cron_task.status, TaskStatus::Completed);
        assert_eq!(cron_task.success_runs, 3);
        assert!(cron_task.next_run_time.unwrap() > Utc::now());

        let failed = tasks.get_by_id(2).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("图像获取失败"));

        let node = &registry.list_workers().await[0].node;
        assert_eq!(node.current_tasks, 0);
        assert_eq!(node.total_completed, 1);
        assert_eq!(node.total_failed, 1);

        let missing = registry
            .complete_task(
                99,
                CompletionReport {
                    worker_id: "node-a".to_string(),
                    success: true,
                    result: None,
                    error_message: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(missing, SchedulerError::TaskNotFound { id: 99 }));
    }
}
