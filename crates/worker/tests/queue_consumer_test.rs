use std::sync::Arc;
use std::time::{Duration, Instant};

use diagnosis_core::{
    models::{DiagnosisTask, TaskDispatchMessage, TaskPayload, TaskStatus},
    traits::{DiagnosisTaskRepository, MessageQueue},
};
use diagnosis_executor::{DiagnosisExecutor, ExecutorRepositories};
use diagnosis_infrastructure::{
    InMemoryAlarmRepository, InMemoryCameraRepository, InMemoryMessageQueue,
    InMemoryResultRepository, InMemoryTaskRepository,
};
use diagnosis_testing_utils::{
    checkerboard_frame, CameraBuilder, DiagnosisTaskBuilder, StaticImageSource,
};
use diagnosis_worker::{ConsumeOutcome, QueueConsumer};
use tokio::sync::broadcast;

const REQUEUE_DELAY: Duration = Duration::from_millis(50);

struct Fixture {
    tasks: Arc<InMemoryTaskRepository>,
    queue: Arc<InMemoryMessageQueue>,
    executor: Arc<DiagnosisExecutor>,
}

impl Fixture {
    async fn new() -> Self {
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let cameras = Arc::new(InMemoryCameraRepository::new());
        cameras.insert(CameraBuilder::new(1).build()).await;

        let executor = DiagnosisExecutor::builder(
            ExecutorRepositories {
                tasks: tasks.clone(),
                cameras,
                results: Arc::new(InMemoryResultRepository::new()),
                alarms: Arc::new(InMemoryAlarmRepository::new()),
            },
            Arc::new(StaticImageSource::new(checkerboard_frame(32, 32, 4))),
        )
        .build();

        Self {
            tasks,
            queue: Arc::new(InMemoryMessageQueue::new()),
            executor: Arc::new(executor),
        }
    }

    fn consumer(&self, capacity: u32) -> QueueConsumer {
        QueueConsumer::new(
            "consumer-1",
            self.queue.clone(),
            self.tasks.clone(),
            self.executor.clone(),
            capacity,
        )
        .with_requeue_delay(REQUEUE_DELAY)
    }

    async fn publish(&self, task: DiagnosisTask) {
        let payload = TaskPayload::from(&task);
        self.tasks.insert(task).await;
        self.queue
            .publish_task(&TaskDispatchMessage::new(payload, 5))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_message_executed_and_result_published() {
    let fx = Fixture::new().await;
    fx.publish(DiagnosisTaskBuilder::new().with_id(1).build()).await;
    let consumer = fx.consumer(2);

    assert_eq!(consumer.process_next().await.unwrap(), ConsumeOutcome::Started(1));
    assert!(consumer.drain(Duration::from_secs(5)).await);

    assert_eq!(fx.queue.unacked_count().await, 0);
    let result = fx.queue.next_result().await.unwrap().unwrap().message;
    assert_eq!(result.task_id, 1);
    assert_eq!(result.worker_id, "consumer-1");
    assert!(result.result.is_success());

    let task = fx.tasks.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.total_runs, 1);

    assert_eq!(consumer.process_next().await.unwrap(), ConsumeOutcome::Idle);
    assert_eq!(consumer.snapshot().tasks_completed, 1);
}

#[tokio::test]
async fn test_message_requeued_when_at_capacity() {
    let fx = Fixture::new().await;
    fx.publish(DiagnosisTaskBuilder::new().with_id(1).build()).await;
    fx.publish(DiagnosisTaskBuilder::new().with_id(2).build()).await;
    let consumer = fx.consumer(1);

    let busy = consumer.in_flight().try_acquire(99).unwrap();
    let started = Instant::now();
    assert_eq!(consumer.process_next().await.unwrap(), ConsumeOutcome::Requeued(1));
    assert!(started.elapsed() >= REQUEUE_DELAY);
    assert_eq!(fx.queue.task_queue_info().await.unwrap().message_count, 2);
    drop(busy);

    let delivery = fx.queue.next_task().await.unwrap().unwrap();
    assert_eq!(delivery.message.task_id, 1);
    assert!(delivery.redelivered);
}

#[tokio::test]
async fn test_duplicate_delivery_requeued() {
    let fx = Fixture::new().await;
    fx.publish(DiagnosisTaskBuilder::new().with_id(1).build()).await;
    let consumer = fx.consumer(3);

    let running = consumer.in_flight().try_acquire(1).unwrap();
    let started = Instant::now();
    assert_eq!(consumer.process_next().await.unwrap(), ConsumeOutcome::Requeued(1));
    assert!(started.elapsed() >= REQUEUE_DELAY);
    drop(running);

    assert_eq!(consumer.process_next().await.unwrap(), ConsumeOutcome::Started(1));
    assert!(consumer.drain(Duration::from_secs(5)).await);
    assert!(fx.queue.next_result().await.unwrap().is_some());
}

#[tokio::test]
async fn test_missing_task_reported_as_failure() {
    let fx = Fixture::new().await;
    let payload = TaskPayload::from(&DiagnosisTaskBuilder::new().with_id(42).build());
    fx.queue
        .publish_task(&TaskDispatchMessage::new(payload, 5))
        .await
        .unwrap();
    let consumer = fx.consumer(1);

    assert_eq!(consumer.process_next().await.unwrap(), ConsumeOutcome::Started(42));
    assert!(consumer.drain(Duration::from_secs(5)).await);

    assert_eq!(fx.queue.unacked_count().await, 0);
    let result = fx.queue.next_result().await.unwrap().unwrap().message;
    assert!(!result.result.is_success());
    assert!(result.result.error().is_some());
}

#[tokio::test]
async fn test_run_loop_publishes_heartbeats_and_stops() {
    let fx = Fixture::new().await;
    fx.publish(DiagnosisTaskBuilder::new().with_id(1).build()).await;
    let consumer = fx.consumer(1);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = tokio::spawn(consumer.run(
        Duration::from_millis(10),
        Duration::from_millis(10),
        Duration::from_secs(5),
        shutdown_rx,
    ));

    let queue = fx.queue.clone();
    let mut published = None;
    for _ in 0..250 {
        if let Some(delivery) = queue.next_result().await.unwrap() {
            published = Some(delivery.message);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(published.unwrap().task_id, 1);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    let heartbeat = fx.queue.next_heartbeat().await.unwrap().unwrap();
    assert_eq!(heartbeat.worker_id, "consumer-1");
}
