use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diagnosis_core::{
    models::{DiagnosisTask, TaskStatus},
    traits::DiagnosisTaskRepository,
    SchedulerError, SchedulerResult,
};
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<BTreeMap<i64, DiagnosisTask>>,
    next_id: AtomicI64,
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// 原样写入任务（保留ID），测试中用于构造任意状态
    pub async fn insert(&self, task: DiagnosisTask) {
        self.next_id.fetch_max(task.id + 1, Ordering::SeqCst);
        self.tasks.write().await.insert(task.id, task);
    }

    async fn update<F>(&self, id: i64, f: F) -> SchedulerResult<()>
    where
        F: FnOnce(&mut DiagnosisTask),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or(SchedulerError::TaskNotFound { id })?;
        f(task);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn filter<F>(&self, predicate: F) -> Vec<DiagnosisTask>
    where
        F: Fn(&DiagnosisTask) -> bool,
    {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| predicate(t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DiagnosisTaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &DiagnosisTask) -> SchedulerResult<DiagnosisTask> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let mut created = task.clone();
        created.id = id;
        created.created_at = now;
        created.updated_at = now;
        self.tasks.write().await.insert(id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DiagnosisTask>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_active(&self) -> SchedulerResult<Vec<DiagnosisTask>> {
        Ok(self.filter(|t| t.is_active).await)
    }

    async fn list_by_status(&self, status: TaskStatus) -> SchedulerResult<Vec<DiagnosisTask>> {
        Ok(self.filter(|t| t.status == status).await)
    }

    async fn list_assigned_to(&self, worker_id: &str) -> SchedulerResult<Vec<DiagnosisTask>> {
        Ok(self
            .filter(|t| t.assigned_worker.as_deref() == Some(worker_id))
            .await)
    }

    async fn list_running_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DiagnosisTask>> {
        Ok(self
            .filter(|t| t.status == TaskStatus::Running && t.started_at.is_some_and(|s| s < cutoff))
            .await)
    }

    async fn mark_running(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.update(id, |t| {
            t.status = TaskStatus::Running;
            t.last_run_time = Some(now);
            t.started_at = Some(now);
            t.completed_at = None;
            t.error_message = None;
            t.total_runs += 1;
        })
        .await
    }

    async fn update_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> SchedulerResult<()> {
        self.update(id, |t| {
            t.status = status;
            t.error_message = error_message.map(str::to_string);
            if matches!(
                status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
            ) {
                t.completed_at = Some(Utc::now());
            }
        })
        .await
    }

    async fn reset_to_pending(&self, id: i64) -> SchedulerResult<()> {
        self.update(id, |t| {
            t.status = TaskStatus::Pending;
            t.assigned_worker = None;
            t.started_at = None;
        })
        .await
    }

    async fn assign_to_worker(&self, id: i64, worker_id: &str) -> SchedulerResult<()> {
        self.update(id, |t| {
            t.status = TaskStatus::Pending;
            t.assigned_worker = Some(worker_id.to_string());
        })
        .await
    }

    async fn claim_pending(
        &self,
        worker_id: &str,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DiagnosisTask>> {
        let mut tasks = self.tasks.write().await;
        let claimable = |t: &DiagnosisTask| t.status == TaskStatus::Pending && t.is_active;
        let mut ids: Vec<(bool, i64)> = tasks
            .values()
            .filter(|t| claimable(t))
            .filter_map(|t| match t.assigned_worker.as_deref() {
                Some(w) if w == worker_id => Some((false, t.id)),
                None => Some((true, t.id)),
                Some(_) => None,
            })
            .collect();
        ids.sort();
        ids.truncate(batch_size);

        let mut claimed = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            if let Some(task) = tasks.get_mut(&id) {
                task.status = TaskStatus::Running;
                task.assigned_worker = Some(worker_id.to_string());
                task.started_at = Some(now);
                task.updated_at = Utc::now();
                claimed.push(task.clone());
            }
        }
        claimed.sort_by_key(|t| t.id);
        Ok(claimed)
    }

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        self.update(id, |t| t.next_run_time = next_run_time).await
    }

    async fn record_completion(&self, id: i64, success_count: i32) -> SchedulerResult<()> {
        self.update(id, |t| {
            t.status = TaskStatus::Completed;
            t.success_runs += success_count;
            t.error_message = None;
            t.completed_at = Some(Utc::now());
        })
        .await
    }

    async fn schedule_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        self.update(id, |t| {
            t.retry_count = retry_count;
            t.next_retry_at = next_retry_at;
        })
        .await
    }
}
