pub mod api_observability;
pub mod app_config;
pub mod database;
pub mod dispatcher_worker;
pub mod message_queue;
pub mod storage;

pub use api_observability::{ApiConfig, ObservabilityConfig};
pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use dispatcher_worker::{DispatcherConfig, QueueSchedulerConfig, SchedulerStrategyKind, WorkerConfig, WorkerTransport};
pub use message_queue::MessageQueueConfig;
pub use storage::StorageConfig;
