pub mod dispatcher_client;
pub mod heartbeat_manager;
pub mod registration;
pub mod task_execution;
pub mod worker_lifecycle;

pub use dispatcher_client::{DispatcherClient, RegistryApi};
pub use heartbeat_manager::HeartbeatManager;
pub use registration::RegistrationSession;
pub use task_execution::{Admission, TaskExecutionManager};
pub use worker_lifecycle::{generate_node_id, registration_from_config, WorkerLifecycle};
