use async_trait::async_trait;

use crate::{
    models::{Delivery, HeartbeatMessage, QueueInfo, TaskDispatchMessage, TaskResultMessage},
    Result,
};

/// 诊断任务消息代理抽象
///
/// 任务队列支持消息优先级与TTL；消费者处理成功后 `ack`，
/// 处理不了时 `nack(requeue = true)` 让消息回到队列由其他消费者重试。
/// 任务与结果消息的投递标签属于同一个通道，共用 `ack` 与 `nack`。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布任务消息，`priority` 取值 0..=10
    async fn publish_task(&self, message: &TaskDispatchMessage) -> Result<()>;

    /// 取出一条任务消息，队列为空时返回 `None`
    async fn next_task(&self) -> Result<Option<Delivery<TaskDispatchMessage>>>;

    /// 确认消息处理完成
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// 拒绝消息，`requeue` 为真时重新入队
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()>;

    /// 发布执行结果
    async fn publish_result(&self, message: &TaskResultMessage) -> Result<()>;

    /// 取出一条结果消息，状态写回成功后才 `ack`
    async fn next_result(&self) -> Result<Option<Delivery<TaskResultMessage>>>;

    /// 广播心跳（非持久化）
    async fn publish_heartbeat(&self, message: &HeartbeatMessage) -> Result<()>;

    /// 取出一条心跳消息（自动确认）
    async fn next_heartbeat(&self) -> Result<Option<HeartbeatMessage>>;

    /// 任务队列状态
    async fn task_queue_info(&self) -> Result<QueueInfo>;

    /// 结果队列状态
    async fn result_queue_info(&self) -> Result<QueueInfo>;
}
