use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diagnosis_core::{
    config::DispatcherConfig,
    models::{DiagnosisTask, HeartbeatSnapshot, TaskStatus},
    traits::{DiagnosisTaskRepository, ImageSource},
    SchedulerError, SchedulerResult,
};
use diagnosis_dispatcher::{SchedulerStrategy, SubmitOutcome, TaskScheduler, WorkerRegistry};
use diagnosis_executor::{DiagnosisExecutor, ExecutorRepositories};
use diagnosis_infrastructure::{
    InMemoryAlarmRepository, InMemoryCameraRepository, InMemoryResultRepository,
    InMemoryTaskRepository,
};
use diagnosis_testing_utils::{
    checkerboard_frame, CameraBuilder, DiagnosisTaskBuilder, SlowImageSource, StaticImageSource,
    WorkerRegistrationBuilder,
};

struct Fixture {
    tasks: Arc<InMemoryTaskRepository>,
    results: Arc<InMemoryResultRepository>,
    registry: Arc<WorkerRegistry>,
    scheduler: TaskScheduler,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_task_repo(Arc::new(InMemoryTaskRepository::new()), None).await
    }

    async fn with_task_repo(
        tasks: Arc<InMemoryTaskRepository>,
        override_repo: Option<Arc<dyn DiagnosisTaskRepository>>,
    ) -> Self {
        let source = Arc::new(StaticImageSource::new(checkerboard_frame(32, 32, 4)));
        Self::build(tasks, override_repo, source).await
    }

    async fn with_image_source(source: Arc<dyn ImageSource>) -> Self {
        Self::build(Arc::new(InMemoryTaskRepository::new()), None, source).await
    }

    async fn build(
        tasks: Arc<InMemoryTaskRepository>,
        override_repo: Option<Arc<dyn DiagnosisTaskRepository>>,
        source: Arc<dyn ImageSource>,
    ) -> Self {
        let cameras = Arc::new(InMemoryCameraRepository::new());
        cameras.insert(CameraBuilder::new(1).build()).await;
        let results = Arc::new(InMemoryResultRepository::new());
        let repo: Arc<dyn DiagnosisTaskRepository> = override_repo
            .unwrap_or_else(|| tasks.clone() as Arc<dyn DiagnosisTaskRepository>);

        let executor = DiagnosisExecutor::builder(
            ExecutorRepositories {
                tasks: repo.clone(),
                cameras,
                results: results.clone(),
                alarms: Arc::new(InMemoryAlarmRepository::new()),
            },
            source,
        )
        .build();

        let config = DispatcherConfig::default();
        let registry = Arc::new(WorkerRegistry::new(repo.clone(), config.worker_liveness_seconds));
        let scheduler = TaskScheduler::new(repo, Arc::new(executor), registry.clone(), &config);

        Self {
            tasks,
            results,
            registry,
            scheduler,
        }
    }

    async fn task(&self, id: i64) -> DiagnosisTask {
        self.tasks.get_by_id(id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_due_task_runs_locally_without_workers() {
    let fx = Fixture::new().await;
    fx.tasks
        .insert(DiagnosisTaskBuilder::new().with_id(1).every_minutes(30).build())
        .await;
    fx.tasks
        .insert(DiagnosisTaskBuilder::new().with_id(2).manual().build())
        .await;

    let before = Utc::now();
    let report = fx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 1);
    assert_eq!(report.delegated, 0);
    assert!(fx.scheduler.drain(Duration::from_secs(5)).await);

    let task = fx.task(1).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_runs, 1);
    let next = task.next_run_time.unwrap();
    assert!(next >= before + chrono::Duration::minutes(30));
    assert_eq!(fx.results.all().await.len(), 1);

    assert_eq!(fx.task(2).await.total_runs, 0);

    let second = fx.scheduler.run_cycle().await.unwrap();
    assert_eq!(second.dispatched, 0);
}

#[tokio::test]
async fn test_due_task_delegated_to_available_worker() {
    let fx = Fixture::new().await;
    fx.registry
        .register(WorkerRegistrationBuilder::new("node-a").capacity(1).build())
        .await
        .unwrap();
    fx.tasks.insert(DiagnosisTaskBuilder::new().with_id(1).build()).await;
    fx.tasks.insert(DiagnosisTaskBuilder::new().with_id(2).build()).await;

    let report = fx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.delegated, 1);
    assert_eq!(report.dispatched, 1);
    assert!(fx.scheduler.drain(Duration::from_secs(5)).await);

    let delegated = fx.task(1).await;
    assert_eq!(delegated.status, TaskStatus::Pending);
    assert_eq!(delegated.assigned_worker.as_deref(), Some("node-a"));
    assert!(delegated.next_run_time.is_some());

    let local = fx.task(2).await;
    assert_eq!(local.status, TaskStatus::Completed);

    let workers = fx.registry.list_workers().await;
    assert_eq!(workers[0].node.current_tasks, 1);
    assert_eq!(workers[0].load_percentage, 100.0);

    let payloads = fx.registry.fetch_tasks("node-a", 1).await.unwrap();
    assert_eq!(payloads[0].task_id, 1);
}

#[tokio::test]
async fn test_orphaned_running_task_is_reset_and_repicked_in_same_cycle() {
    let fx = Fixture::new().await;
    let now = Utc::now();
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(1)
                .every_minutes(60)
                .with_status(TaskStatus::Running)
                .last_run_at(now - chrono::Duration::hours(2))
                .started_at(now - chrono::Duration::hours(2))
                .build(),
        )
        .await;

    let report = fx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.reset, 1);
    assert_eq!(report.dispatched, 1);
    assert!(fx.scheduler.drain(Duration::from_secs(5)).await);

    let task = fx.task(1).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_runs, 1);
}

#[tokio::test]
async fn test_recovery_respects_live_workers_and_is_idempotent() {
    let fx = Fixture::new().await;
    let now = Utc::now();
    fx.registry
        .register(WorkerRegistrationBuilder::new("node-a").build())
        .await
        .unwrap();
    let running = |id: i64, worker: &str, minutes_ago: i64| {
        DiagnosisTaskBuilder::new()
            .with_id(id)
            .with_status(TaskStatus::Running)
            .assigned_to(worker)
            .last_run_at(now - chrono::Duration::minutes(minutes_ago))
            .started_at(now - chrono::Duration::minutes(minutes_ago))
            .build()
    };
    fx.tasks.insert(running(1, "node-a", 5)).await;
    fx.tasks.insert(running(2, "node-a", 45)).await;
    fx.tasks.insert(running(3, "ghost", 1)).await;
    fx.registry
        .heartbeat(
            "node-a",
            HeartbeatSnapshot {
                current_tasks: Some(2),
                running_task_ids: vec![1, 2],
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let report = fx.scheduler.recover_stuck_tasks(false).await.unwrap();
    assert_eq!(report.checked, 3);
    assert_eq!(report.reset_ids, vec![2, 3]);
    assert!(report.details[0].reason.contains("运行时间过长"));
    assert_eq!(report.details[1].reason, "任务不在执行器运行列表中");

    let again = fx.scheduler.recover_stuck_tasks(false).await.unwrap();
    assert_eq!(again.checked, 1);
    assert_eq!(again.reset, 0);
    assert_eq!(fx.task(1).await.status, TaskStatus::Running);

    let forced = fx.scheduler.recover_stuck_tasks(true).await.unwrap();
    assert_eq!(forced.reset_ids, vec![1]);
    assert_eq!(forced.details[0].reason, "强制重置");
    let reset = fx.task(1).await;
    assert_eq!(reset.status, TaskStatus::Pending);
    assert_eq!(reset.assigned_worker, None);
}

#[tokio::test]
async fn test_once_task_left_by_restarted_worker_is_reset() {
    let fx = Fixture::new().await;
    let three_hours_ago = Utc::now() - chrono::Duration::hours(3);
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(1)
                .once()
                .with_status(TaskStatus::Running)
                .assigned_to("edge-01")
                .last_run_at(three_hours_ago)
                .started_at(three_hours_ago)
                .build(),
        )
        .await;
    fx.registry
        .register(WorkerRegistrationBuilder::new("edge-01").build())
        .await
        .unwrap();
    fx.registry
        .heartbeat(
            "edge-01",
            HeartbeatSnapshot {
                current_tasks: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let report = fx.scheduler.recover_stuck_tasks(false).await.unwrap();
    assert_eq!(report.reset, 1);
    assert_eq!(report.details[0].reason, "任务不在执行器运行列表中");

    let task = fx.task(1).await;
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.assigned_worker, None);
}

#[tokio::test]
async fn test_submit_validates_task() {
    let fx = Fixture::new().await;
    fx.tasks.insert(DiagnosisTaskBuilder::new().with_id(1).manual().build()).await;
    fx.tasks
        .insert(DiagnosisTaskBuilder::new().with_id(2).inactive().build())
        .await;
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(3)
                .with_status(TaskStatus::Running)
                .build(),
        )
        .await;

    assert!(matches!(
        fx.scheduler.submit(99).await,
        Err(SchedulerError::TaskNotFound { id: 99 })
    ));
    assert!(matches!(
        fx.scheduler.submit(2).await,
        Err(SchedulerError::TaskInactive { id: 2 })
    ));
    assert!(matches!(
        fx.scheduler.submit(3).await,
        Err(SchedulerError::TaskAlreadyRunning { id: 3 })
    ));

    let outcome = fx.scheduler.submit(1).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Local { task_id: 1 });
    assert!(fx.scheduler.drain(Duration::from_secs(5)).await);

    let task = fx.task(1).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.next_run_time, None);
}

#[tokio::test]
async fn test_status_reports_pool() {
    let fx = Fixture::new().await;
    let status = fx.scheduler.status().await;
    assert_eq!(status.strategy, "http_poll");
    assert_eq!(status.pool_size, 5);
    assert_eq!(status.available_slots, 5);
    assert!(status.running_tasks.is_empty());
    assert!(status.in_dispatch.is_empty());
    assert!(!status.scheduler_running);
}

#[tokio::test]
async fn test_local_execution_capped_at_pool_size() {
    let source = SlowImageSource::new(checkerboard_frame(32, 32, 4), Duration::from_millis(300));
    let fx = Fixture::with_image_source(Arc::new(source.clone())).await;
    for id in 1..=8 {
        fx.tasks.insert(DiagnosisTaskBuilder::new().with_id(id).build()).await;
    }

    let report = fx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.dispatched, 8);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = fx.scheduler.status().await;
    assert_eq!(status.available_slots, 0);
    assert_eq!(status.in_dispatch.len(), 8);

    assert!(fx.scheduler.drain(Duration::from_secs(10)).await);
    assert_eq!(source.peak_concurrency(), 5);
    assert_eq!(source.completed(), 8);
    for id in 1..=8 {
        assert_eq!(fx.task(id).await.status, TaskStatus::Completed);
    }
    assert_eq!(fx.scheduler.status().await.available_slots, 5);
}

/// 写入下次执行时间总是失败的任务仓储
struct BrokenScheduleRepository(Arc<InMemoryTaskRepository>);

#[async_trait]
impl DiagnosisTaskRepository for BrokenScheduleRepository {
    async fn create(&self, task: &DiagnosisTask) -> SchedulerResult<DiagnosisTask> {
        self.0.create(task).await
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DiagnosisTask>> {
        self.0.get_by_id(id).await
    }

    async fn list_active(&self) -> SchedulerResult<Vec<DiagnosisTask>> {
        self.0.list_active().await
    }

    async fn list_by_status(&self, status: TaskStatus) -> SchedulerResult<Vec<DiagnosisTask>> {
        self.0.list_by_status(status).await
    }

    async fn list_assigned_to(&self, worker_id: &str) -> SchedulerResult<Vec<DiagnosisTask>> {
        self.0.list_assigned_to(worker_id).await
    }

    async fn list_running_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DiagnosisTask>> {
        self.0.list_running_started_before(cutoff).await
    }

    async fn mark_running(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<()> {
        self.0.mark_running(id, now).await
    }

    async fn update_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> SchedulerResult<()> {
        self.0.update_status(id, status, error_message).await
    }

    async fn reset_to_pending(&self, id: i64) -> SchedulerResult<()> {
        self.0.reset_to_pending(id).await
    }

    async fn assign_to_worker(&self, id: i64, worker_id: &str) -> SchedulerResult<()> {
        self.0.assign_to_worker(id, worker_id).await
    }

    async fn claim_pending(
        &self,
        worker_id: &str,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DiagnosisTask>> {
        self.0.claim_pending(worker_id, batch_size, now).await
    }

    async fn set_next_run_time(
        &self,
        _id: i64,
        _next_run_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        Err(SchedulerError::DatabaseOperation("连接已断开".to_string()))
    }

    async fn record_completion(&self, id: i64, success_count: i32) -> SchedulerResult<()> {
        self.0.record_completion(id, success_count).await
    }

    async fn schedule_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        self.0.schedule_retry(id, retry_count, next_retry_at).await
    }
}

#[tokio::test]
async fn test_dispatch_error_marks_task_failed() {
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let broken: Arc<dyn DiagnosisTaskRepository> =
        Arc::new(BrokenScheduleRepository(tasks.clone()));
    let fx = Fixture::with_task_repo(tasks, Some(broken)).await;
    fx.tasks.insert(DiagnosisTaskBuilder::new().with_id(1).build()).await;

    let report = fx.scheduler.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.dispatched, 0);

    let task = fx.task(1).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("连接已断开"));
    assert!(task.completed_at.is_some());
}
