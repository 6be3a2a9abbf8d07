use std::collections::HashMap;
use std::sync::Arc;

use diagnosis_algorithms::{AlgorithmConfig, AlgorithmOutput, AlgorithmRegistry, DiagnosisAlgorithm};
use diagnosis_core::{
    config::StorageConfig,
    models::{DiagnosisStatus, DiagnosisType, ExecutionOutcome, TaskPayload, TaskStatus},
    traits::DiagnosisTaskRepository,
    SchedulerError, SchedulerResult,
};
use diagnosis_executor::{DiagnosisExecutor, ExecutorRepositories, ImageArchive, RunningTasks};
use diagnosis_infrastructure::{
    InMemoryAlarmRepository, InMemoryCameraRepository, InMemoryResultRepository,
    InMemoryTaskRepository,
};
use diagnosis_testing_utils::{
    checkerboard_frame, CameraBuilder, DiagnosisTaskBuilder, RecordingObjectStore,
    StaticGroupResolver, StaticImageSource,
};
use image::RgbImage;
use serde_json::json;

struct Fixture {
    tasks: Arc<InMemoryTaskRepository>,
    cameras: Arc<InMemoryCameraRepository>,
    results: Arc<InMemoryResultRepository>,
    alarms: Arc<InMemoryAlarmRepository>,
    source: StaticImageSource,
}

impl Fixture {
    fn new() -> Self {
        Self {
            tasks: Arc::new(InMemoryTaskRepository::new()),
            cameras: Arc::new(InMemoryCameraRepository::new()),
            results: Arc::new(InMemoryResultRepository::new()),
            alarms: Arc::new(InMemoryAlarmRepository::new()),
            source: StaticImageSource::new(checkerboard_frame(64, 64, 8)),
        }
    }

    fn repos(&self) -> ExecutorRepositories {
        ExecutorRepositories {
            tasks: self.tasks.clone(),
            cameras: self.cameras.clone(),
            results: self.results.clone(),
            alarms: self.alarms.clone(),
        }
    }

    fn executor(&self) -> DiagnosisExecutor {
        DiagnosisExecutor::builder(self.repos(), Arc::new(self.source.clone())).build()
    }
}

fn summary(outcome: &ExecutionOutcome) -> &diagnosis_core::models::ExecutionSummary {
    match outcome {
        ExecutionOutcome::Completed(summary) => summary,
        ExecutionOutcome::Failed { error } => panic!("unexpected failure: {error}"),
    }
}

#[tokio::test]
async fn test_runs_every_type_on_every_camera() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(1)
                .with_types(vec![DiagnosisType::Brightness, DiagnosisType::Clarity])
                .build(),
        )
        .await;

    let outcome = fx.executor().execute_task(1).await;
    let summary = summary(&outcome);
    assert!(summary.success);
    assert_eq!(summary.results_count, 2);
    assert_eq!(summary.success_count, 2);
    assert_eq!(summary.error_count, 0);

    let results = fx.results.all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == DiagnosisStatus::Normal));
    assert!(fx.alarms.all().await.is_empty());

    let brightness = results
        .iter()
        .find(|r| r.diagnosis_type == Some(DiagnosisType::Brightness))
        .unwrap();
    assert_eq!(brightness.threshold, None);
    assert_eq!(
        brightness.result_data["diagnosis_info"]["threshold"],
        json!({"min": 30.0, "max": 220.0})
    );
    assert_eq!(brightness.result_data["camera_info"]["id"], json!(1));

    let task = fx.tasks.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.total_runs, 1);
    assert_eq!(task.success_runs, 2);
    assert!(task.last_run_time.is_some());
}

#[tokio::test]
async fn test_offline_camera_records_error_without_acquiring() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.cameras
        .insert(CameraBuilder::new(2).with_name("北门").offline().build())
        .await;
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(3)
                .with_cameras(vec![1, 2])
                .with_types(vec![DiagnosisType::Brightness])
                .build(),
        )
        .await;

    let outcome = fx.executor().execute_task(3).await;
    let summary = summary(&outcome);
    assert_eq!(summary.results_count, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.error_count, 1);
    assert_eq!(fx.source.acquired_cameras(), vec![1]);

    let failed: Vec<_> = fx
        .results
        .all()
        .await
        .into_iter()
        .filter(|r| r.camera_id == 2)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, DiagnosisStatus::Error);
    assert_eq!(failed[0].diagnosis_type, None);
    assert!(failed[0].error_message.as_deref().unwrap().contains("离线"));
    assert!(fx.alarms.all().await.is_empty());
}

#[tokio::test]
async fn test_task_level_failures() {
    let fx = Fixture::new();
    fx.tasks
        .insert(DiagnosisTaskBuilder::new().with_id(1).inactive().build())
        .await;
    fx.tasks
        .insert(DiagnosisTaskBuilder::new().with_id(2).with_cameras(vec![99]).build())
        .await;
    let executor = fx.executor();

    assert_eq!(executor.execute_task(404).await.error(), Some("任务不存在"));

    assert_eq!(executor.execute_task(1).await.error(), Some("任务未启用"));
    let inactive = fx.tasks.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(inactive.status, TaskStatus::Failed);

    assert_eq!(
        executor.execute_task(2).await.error(),
        Some("没有找到可用的摄像头")
    );
    let no_cameras = fx.tasks.get_by_id(2).await.unwrap().unwrap();
    assert_eq!(no_cameras.status, TaskStatus::Failed);
    assert!(no_cameras.error_message.is_some());
    assert!(executor.running_tasks().is_empty());
}

#[tokio::test]
async fn test_rejects_task_already_running() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.tasks
        .insert(DiagnosisTaskBuilder::new().with_id(5).build())
        .await;

    let running = RunningTasks::new();
    let executor = DiagnosisExecutor::builder(fx.repos(), Arc::new(fx.source.clone()))
        .running_tasks(running.clone())
        .build();

    let guard = running.try_acquire(5).unwrap();
    assert!(executor.is_running(5));
    assert_eq!(executor.execute_task(5).await.error(), Some("任务已在运行中"));
    assert!(fx.results.all().await.is_empty());

    drop(guard);
    assert!(executor.execute_task(5).await.is_success());
    assert!(!executor.is_running(5));
}

#[tokio::test]
async fn test_threshold_config_drives_status_and_alarm() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(7)
                .with_name("清晰度巡检")
                .with_types(vec![DiagnosisType::Clarity])
                .with_threshold_config(json!({"clarity": {"clarity_min": 1.0e9}}))
                .build(),
        )
        .await;

    let outcome = fx.executor().execute_task(7).await;
    let summary = summary(&outcome);
    assert_eq!(summary.results_count, 1);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.error_count, 1);

    let results = fx.results.all().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, DiagnosisStatus::Warning);
    assert!(results[0].is_abnormal);
    assert_eq!(results[0].threshold, Some(1.0e9));

    let alarms = fx.alarms.all().await;
    assert_eq!(alarms.len(), 1);
    assert_eq!(alarms[0].result_id, results[0].id);
    assert_eq!(alarms[0].threshold_config["operator"], "lt");
    assert!(alarms[0].title.starts_with("摄像头诊断异常: "));
    assert!(alarms[0].description.starts_with("任务: 清晰度巡检"));
}

#[tokio::test]
async fn test_abnormal_result_does_not_count_as_success_run() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(8)
                .with_types(vec![DiagnosisType::Brightness, DiagnosisType::Clarity])
                .with_threshold_config(json!({"clarity": {"clarity_min": 1.0e9}}))
                .build(),
        )
        .await;

    let outcome = fx.executor().execute_task(8).await;
    let summary = summary(&outcome);
    assert!(summary.success);
    assert_eq!(summary.results_count, 2);
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.error_count, 1);

    let task = fx.tasks.get_by_id(8).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.success_runs, 1);
}

#[tokio::test]
async fn test_generic_threshold_maps_to_clarity_scale() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(8)
                .with_types(vec![DiagnosisType::Clarity])
                .with_threshold_config(json!({"threshold": 0.8}))
                .build(),
        )
        .await;

    fx.executor().execute_task(8).await;
    let results = fx.results.all().await;
    let threshold = results[0].threshold.unwrap();
    assert!((threshold - 80.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_freeze_state_survives_between_runs() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(9)
                .with_types(vec![DiagnosisType::Freeze])
                .build(),
        )
        .await;
    let executor = fx.executor();

    executor.execute_task(9).await;
    executor.execute_task(9).await;

    let statuses: Vec<_> = fx.results.all().await.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![DiagnosisStatus::Normal, DiagnosisStatus::Warning]
    );
    assert_eq!(fx.alarms.all().await.len(), 1);
}

struct BrokenAlgorithm;

impl DiagnosisAlgorithm for BrokenAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Noise
    }

    fn diagnose(
        &mut self,
        _image: &RgbImage,
        _config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        Err(SchedulerError::Algorithm("传感器数据异常".to_string()))
    }
}

#[tokio::test]
async fn test_algorithm_error_becomes_error_result() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.tasks
        .insert(
            DiagnosisTaskBuilder::new()
                .with_id(4)
                .with_types(vec![DiagnosisType::Brightness, DiagnosisType::Noise])
                .build(),
        )
        .await;

    let executor = DiagnosisExecutor::builder(fx.repos(), Arc::new(fx.source.clone()))
        .algorithm_registry(
            AlgorithmRegistry::standard().with(DiagnosisType::Noise, || Box::new(BrokenAlgorithm)),
        )
        .build();

    let outcome = executor.execute_task(4).await;
    let summary = summary(&outcome);
    assert!(summary.success);
    assert_eq!(summary.results_count, 2);
    assert_eq!(summary.error_count, 1);

    let noise = fx
        .results
        .all()
        .await
        .into_iter()
        .find(|r| r.diagnosis_type == Some(DiagnosisType::Noise))
        .unwrap();
    assert_eq!(noise.status, DiagnosisStatus::Error);
    assert!(noise.error_message.unwrap().contains("传感器数据异常"));
    assert!(fx.alarms.all().await.is_empty());

    let task = fx.tasks.get_by_id(4).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.success_runs, 1);
}

#[tokio::test]
async fn test_payload_expands_groups_and_archives_once_per_camera() {
    let fx = Fixture::new();
    fx.cameras.insert(CameraBuilder::new(1).build()).await;
    fx.cameras.insert(CameraBuilder::new(2).build()).await;
    let store = RecordingObjectStore::new();

    let executor = DiagnosisExecutor::builder(fx.repos(), Arc::new(fx.source.clone()))
        .group_resolver(Arc::new(StaticGroupResolver::new(HashMap::from([(
            10,
            vec![1, 2],
        )]))))
        .image_archive(ImageArchive::new(
            &StorageConfig::default(),
            Some(Arc::new(store.clone())),
        ))
        .build();

    let payload = TaskPayload::from(
        &DiagnosisTaskBuilder::new()
            .with_id(20)
            .with_cameras(vec![1])
            .with_camera_groups(vec![10])
            .with_types(vec![DiagnosisType::Brightness, DiagnosisType::Contrast])
            .build(),
    );

    let outcome = executor.execute_payload(&payload).await;
    assert_eq!(summary(&outcome).results_count, 4);

    let mut acquired = fx.source.acquired_cameras();
    acquired.sort_unstable();
    assert_eq!(acquired, vec![1, 2]);

    // 每个摄像头一张原图加一张缩略图
    assert_eq!(store.uploads().len(), 4);
    let results = fx.results.all().await;
    assert!(results.iter().all(|r| r.image_url.is_some()));
    assert!(store
        .uploads()
        .iter()
        .all(|(_, key, _)| key.contains("_brightness_")));

    // 远程执行不触碰任务表
    assert!(fx.tasks.get_by_id(20).await.unwrap().is_none());
}
