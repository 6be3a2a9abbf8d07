//! 诊断Worker节点
//!
//! 两种取任务方式：
//! - HTTP：向调度中心注册、发送心跳、轮询领取任务并回报结果（[`WorkerLifecycle`]）
//! - 队列：直接消费任务队列并把结果发布到结果队列（[`QueueConsumer`]）

pub mod components;
pub mod queue_consumer;

pub use components::{
    generate_node_id, registration_from_config, Admission, DispatcherClient, HeartbeatManager,
    RegistrationSession, RegistryApi, TaskExecutionManager, WorkerLifecycle,
};
pub use queue_consumer::{ConsumeOutcome, QueueConsumer};
