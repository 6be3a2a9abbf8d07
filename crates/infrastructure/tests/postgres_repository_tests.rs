//! PostgreSQL仓储集成测试，需要本地Docker环境
//!
//! 运行: `cargo test -p diagnosis-infrastructure -- --ignored`

use chrono::{Duration, Utc};
use diagnosis_core::{
    models::{
        AlarmSeverity, DiagnosisStatus, DiagnosisType, NewDiagnosisAlarm, NewDiagnosisResult,
        TaskStatus,
    },
    traits::{
        CameraRepository, DiagnosisAlarmRepository, DiagnosisResultRepository,
        DiagnosisTaskRepository,
    },
    SchedulerError,
};
use diagnosis_infrastructure::{
    DatabaseManager,
    PostgresAlarmRepository, PostgresCameraRepository, PostgresResultRepository,
    PostgresTaskRepository,
};
use diagnosis_testing_utils::{DatabaseTestContainer, DiagnosisTaskBuilder};

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_task_lifecycle_round_trip() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let repo = PostgresTaskRepository::new(db.pool.clone());

    let created = repo
        .create(
            &DiagnosisTaskBuilder::new()
                .with_name("夜间巡检")
                .with_types(vec![DiagnosisType::Brightness, DiagnosisType::FlowerScreen])
                .with_diagnosis_config(serde_json::json!({"brightness": {"threshold": 0.5}}))
                .every_minutes(15)
                .build(),
        )
        .await
        .unwrap();
    assert!(created.id > 0);

    let loaded = repo.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(
        loaded.diagnosis_types,
        vec![DiagnosisType::Brightness, DiagnosisType::FlowerScreen]
    );
    assert_eq!(loaded.interval_minutes, Some(15));

    let now = Utc::now();
    repo.mark_running(created.id, now).await.unwrap();
    let running = repo.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(running.status, TaskStatus::Running);
    assert_eq!(running.total_runs, 1);

    repo.record_completion(created.id, 2).await.unwrap();
    let done = repo.get_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.success_runs, 2);
    assert!(done.completed_at.is_some());

    let missing = repo.update_status(9999, TaskStatus::Failed, None).await;
    assert!(matches!(missing, Err(SchedulerError::TaskNotFound { id: 9999 })));
}

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_claim_prefers_assigned_then_unassigned() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let repo = PostgresTaskRepository::new(db.pool.clone());

    let mine = repo.create(&DiagnosisTaskBuilder::new().build()).await.unwrap();
    let other = repo.create(&DiagnosisTaskBuilder::new().build()).await.unwrap();
    let unassigned = repo.create(&DiagnosisTaskBuilder::new().build()).await.unwrap();
    repo.assign_to_worker(mine.id, "node-a").await.unwrap();
    repo.assign_to_worker(other.id, "node-b").await.unwrap();

    let claimed = repo.claim_pending("node-a", 1, Utc::now()).await.unwrap();
    assert_eq!(claimed.iter().map(|t| t.id).collect::<Vec<_>>(), vec![mine.id]);
    assert_eq!(claimed[0].status, TaskStatus::Running);

    let next = repo.claim_pending("node-a", 5, Utc::now()).await.unwrap();
    assert_eq!(next.iter().map(|t| t.id).collect::<Vec<_>>(), vec![unassigned.id]);
    assert_eq!(next[0].assigned_worker.as_deref(), Some("node-a"));

    let untouched = repo.get_by_id(other.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, TaskStatus::Pending);

    let stale = repo
        .list_running_started_before(Utc::now() + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stale.len(), 2);

    repo.reset_to_pending(mine.id).await.unwrap();
    let reset = repo.get_by_id(mine.id).await.unwrap().unwrap();
    assert_eq!(reset.assigned_worker, None);
    assert_eq!(reset.status, TaskStatus::Pending);
}

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_results_and_alarm_acknowledgement() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let camera_id = db
        .insert_camera("east-gate", Some("http://10.0.0.1/snap.jpg"), true)
        .await
        .unwrap();

    let cameras = PostgresCameraRepository::new(db.pool.clone());
    let found = cameras.find_active_by_ids(&[camera_id, 404]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "east-gate");

    let results = PostgresResultRepository::new(db.pool.clone());
    let result = results
        .create(NewDiagnosisResult {
            task_id: 1,
            camera_id,
            camera_name: "east-gate".to_string(),
            diagnosis_type: Some(DiagnosisType::Brightness),
            status: DiagnosisStatus::Warning,
            score: Some(42.0),
            threshold: Some(50.0),
            is_abnormal: true,
            processing_time: Some(12.5),
            error_message: None,
            suggestions: vec!["检查补光".to_string()],
            metrics: serde_json::json!({"mean_brightness": 30.0}),
            image_url: None,
            thumbnail_url: None,
            image_timestamp: Some(Utc::now()),
            result_data: serde_json::json!({}),
        })
        .await
        .unwrap();
    assert_eq!(results.list_by_task(1).await.unwrap().len(), 1);

    let alarms = PostgresAlarmRepository::new(db.pool.clone());
    let alarm = alarms
        .create(NewDiagnosisAlarm {
            result_id: result.id,
            task_id: 1,
            camera_id,
            camera_name: "east-gate".to_string(),
            alarm_type: Some(DiagnosisType::Brightness),
            severity: AlarmSeverity::Warning,
            title: "摄像头诊断异常: 亮度偏低".to_string(),
            description: "desc".to_string(),
            threshold_config: serde_json::json!({"threshold": 50.0, "operator": "lt"}),
            current_value: Some(42.0),
            threshold_value: Some(50.0),
        })
        .await
        .unwrap();
    assert!(!alarm.is_acknowledged);

    let acked = alarms.acknowledge(alarm.id, 7, Utc::now()).await.unwrap();
    assert!(acked.is_acknowledged);
    assert_eq!(acked.acknowledged_by, Some(7));

    let missing = alarms.acknowledge(12345, 7, Utc::now()).await;
    assert!(matches!(missing, Err(SchedulerError::AlarmNotFound { id: 12345 })));
}

#[tokio::test]
#[ignore = "需要Docker"]
async fn test_manager_migrations_are_repeatable() {
    let db = DatabaseTestContainer::new().await.unwrap();
    let manager = DatabaseManager::from_pool(db.pool.clone());

    manager.migrate().await.unwrap();
    manager.health_check().await.unwrap();

    manager.close().await;
    assert!(manager.health_check().await.is_err());
}
