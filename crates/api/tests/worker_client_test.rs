use std::sync::Arc;
use std::time::Duration;

use diagnosis_api::{create_app, serve, AppState};
use diagnosis_core::{
    config::{ApiConfig, DispatcherConfig, WorkerConfig},
    models::{CompletionReport, HeartbeatSnapshot, TaskStatus},
    traits::DiagnosisTaskRepository,
    SchedulerError,
};
use diagnosis_dispatcher::{TaskScheduler, WorkerRegistry};
use diagnosis_executor::{DiagnosisExecutor, ExecutorRepositories};
use diagnosis_infrastructure::{
    InMemoryAlarmRepository, InMemoryCameraRepository, InMemoryResultRepository,
    InMemoryTaskRepository,
};
use diagnosis_testing_utils::{
    checkerboard_frame, CameraBuilder, DiagnosisTaskBuilder, StaticImageSource,
    WorkerRegistrationBuilder,
};
use diagnosis_worker::{DispatcherClient, RegistrationSession, RegistryApi};
use tokio::sync::broadcast;

struct Server {
    tasks: Arc<InMemoryTaskRepository>,
    registry: Arc<WorkerRegistry>,
    base_url: String,
    shutdown_tx: broadcast::Sender<()>,
    handle: tokio::task::JoinHandle<()>,
}

impl Server {
    async fn start() -> Self {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let cameras = Arc::new(InMemoryCameraRepository::new());
        cameras.insert(CameraBuilder::new(1).build()).await;
        let alarms = Arc::new(InMemoryAlarmRepository::new());

        let executor = DiagnosisExecutor::builder(
            ExecutorRepositories {
                tasks: tasks.clone(),
                cameras,
                results: Arc::new(InMemoryResultRepository::new()),
                alarms: alarms.clone(),
            },
            Arc::new(StaticImageSource::new(checkerboard_frame(32, 32, 4))),
        )
        .build();

        let config = DispatcherConfig::default();
        let registry = Arc::new(WorkerRegistry::new(tasks.clone(), config.worker_liveness_seconds));
        let scheduler = Arc::new(TaskScheduler::new(
            tasks.clone(),
            Arc::new(executor),
            registry.clone(),
            &config,
        ));
        let app = create_app(
            AppState {
                strategy: scheduler,
                registry: registry.clone(),
                alarms,
            },
            &ApiConfig::default(),
        );

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (shutdown_tx, _) = broadcast::channel(1);
        let shutdown_rx = shutdown_tx.subscribe();
        let bind = address.clone();
        let handle = tokio::spawn(async move {
            serve(app, &bind, shutdown_rx).await.unwrap();
        });

        let base_url = format!("http://{address}/api/v1/diagnosis");
        let health = format!("http://{address}/health");
        for _ in 0..100 {
            if reqwest::get(&health).await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        Self {
            tasks,
            registry,
            base_url,
            shutdown_tx,
            handle,
        }
    }

    fn client(&self) -> DispatcherClient {
        DispatcherClient::new(&WorkerConfig {
            master_url: format!("{}/", self.base_url),
            ..Default::default()
        })
        .unwrap()
    }

    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

#[tokio::test]
async fn test_client_round_trip_over_http() {
    let server = Server::start().await;
    server.tasks.insert(DiagnosisTaskBuilder::new().with_id(1).build()).await;
    let client = server.client();

    let node_id = client
        .register(&WorkerRegistrationBuilder::new("edge-01").capacity(2).build())
        .await
        .unwrap();
    assert_eq!(node_id, "edge-01");

    client
        .heartbeat("edge-01", &HeartbeatSnapshot::default())
        .await
        .unwrap();

    let tasks = client.fetch_tasks("edge-01", 1).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id, 1);

    client
        .complete_task(
            1,
            &CompletionReport {
                worker_id: "edge-01".to_string(),
                success: false,
                result: None,
                error_message: Some("没有找到可用的摄像头".to_string()),
            },
        )
        .await
        .unwrap();
    let task = server.tasks.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message.as_deref(), Some("没有找到可用的摄像头"));

    client.unregister("edge-01").await.unwrap();
    assert!(server.registry.list_workers().await.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_worker_maps_to_not_found_and_reregisters() {
    let server = Server::start().await;
    let client = server.client();

    let err = client
        .heartbeat("ghost", &HeartbeatSnapshot::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::WorkerNotFound { .. }));

    let session = RegistrationSession::new(
        Arc::new(client),
        WorkerRegistrationBuilder::new("edge-02").build(),
    );
    session
        .heartbeat(&HeartbeatSnapshot::default())
        .await
        .unwrap();
    let workers = server.registry.list_workers().await;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].node.node_id, "edge-02");

    server.stop().await;
}
