use async_trait::async_trait;
use diagnosis_core::{
    config::MessageQueueConfig,
    models::{
        Delivery, HeartbeatMessage, QueueInfo, TaskDispatchMessage, TaskResultMessage,
        MAX_PRIORITY,
    },
    traits::MessageQueue,
    Result, SchedulerError,
};
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, instrument, warn};

const PERSISTENT: u8 = 2;
const TRANSIENT: u8 = 1;

/// 队列的持久化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueKind {
    /// 任务与结果：持久化，代理重启后保留
    Durable,
    /// 心跳：非持久化，最后一个消费者断开后自动删除
    Transient,
}

impl QueueKind {
    fn declare_options(self) -> QueueDeclareOptions {
        let durable = self == QueueKind::Durable;
        QueueDeclareOptions {
            durable,
            exclusive: false,
            auto_delete: !durable,
            ..Default::default()
        }
    }
}

/// RabbitMQ消息队列实现
///
/// 拓扑：
/// - 任务：direct交换机 -> 持久化优先级队列（带消息TTL）
/// - 结果：direct交换机 -> 持久化队列
/// - 心跳：fanout交换机 -> 非持久化、自动删除的队列
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Channel,
    config: MessageQueueConfig,
}

impl RabbitMQMessageQueue {
    /// 连接RabbitMQ并声明交换机与队列
    pub async fn new(config: MessageQueueConfig) -> Result<Self> {
        let connection = tokio::time::timeout(
            std::time::Duration::from_secs(config.connection_timeout_seconds),
            Connection::connect(&config.url, ConnectionProperties::default()),
        )
        .await
        .map_err(|_| SchedulerError::MessageQueue("连接RabbitMQ超时".to_string()))?
        .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("设置预取数量失败: {e}")))?;

        info!("成功连接到RabbitMQ: {}", config.url);

        let queue = Self {
            connection,
            channel,
            config,
        };
        queue.declare_topology().await?;
        Ok(queue)
    }

    async fn declare_topology(&self) -> Result<()> {
        let cfg = &self.config;

        self.declare_exchange(&cfg.task_exchange, ExchangeKind::Direct, true)
            .await?;
        self.declare_exchange(&cfg.result_exchange, ExchangeKind::Direct, true)
            .await?;
        self.declare_exchange(&cfg.heartbeat_exchange, ExchangeKind::Fanout, false)
            .await?;

        let mut task_args = FieldTable::default();
        task_args.insert(
            "x-max-priority".into(),
            AMQPValue::LongInt(i32::from(cfg.max_priority)),
        );
        task_args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongInt(i32::try_from(cfg.message_ttl_ms).unwrap_or(i32::MAX)),
        );
        self.declare_queue(&cfg.task_queue, QueueKind::Durable, task_args)
            .await?;
        self.declare_queue(&cfg.result_queue, QueueKind::Durable, FieldTable::default())
            .await?;
        self.declare_queue(&cfg.heartbeat_queue, QueueKind::Transient, FieldTable::default())
            .await?;

        self.bind(&cfg.task_queue, &cfg.task_exchange, &cfg.task_routing_key)
            .await?;
        self.bind(&cfg.result_queue, &cfg.result_exchange, &cfg.result_routing_key)
            .await?;
        self.bind(&cfg.heartbeat_queue, &cfg.heartbeat_exchange, "")
            .await?;

        info!("RabbitMQ交换机与队列初始化完成");
        Ok(())
    }

    async fn declare_exchange(&self, name: &str, kind: ExchangeKind, durable: bool) -> Result<()> {
        self.channel
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("声明交换机 {name} 失败: {e}")))?;
        debug!("交换机 {} 声明成功", name);
        Ok(())
    }

    async fn declare_queue(&self, name: &str, kind: QueueKind, args: FieldTable) -> Result<()> {
        self.channel
            .queue_declare(name, kind.declare_options(), args)
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("声明队列 {name} 失败: {e}")))?;
        debug!("队列 {} 声明成功", name);
        Ok(())
    }

    async fn bind(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("绑定队列 {queue} 到 {exchange} 失败: {e}"))
            })?;
        Ok(())
    }

    async fn publish<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &T,
        properties: BasicProperties,
    ) -> Result<()> {
        let payload = serde_json::to_vec(message)
            .map_err(|e| SchedulerError::Serialization(format!("序列化消息失败: {e}")))?;

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                properties
                    .with_content_type("application/json".into())
                    .with_content_encoding("utf-8".into()),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("发布消息到交换机 {exchange} 失败: {e}"))
            })?;

        confirm
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("消息发布确认失败: {e}")))?;
        Ok(())
    }

    /// 单条拉取，`auto_ack` 为真时由代理直接确认
    async fn get<T: DeserializeOwned>(
        &self,
        queue: &str,
        auto_ack: bool,
    ) -> Result<Option<Delivery<T>>> {
        let message = self
            .channel
            .basic_get(
                queue,
                BasicGetOptions { no_ack: auto_ack },
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("从队列 {queue} 获取消息失败: {e}")))?;

        let Some(message) = message else {
            return Ok(None);
        };

        match serde_json::from_slice::<T>(&message.data) {
            Ok(parsed) => Ok(Some(Delivery {
                delivery_tag: message.delivery_tag,
                redelivered: message.redelivered,
                message: parsed,
            })),
            Err(e) => {
                // 无法解析的消息直接丢弃，避免反复投递
                warn!("队列 {} 中的消息格式无效，已丢弃: {}", queue, e);
                if !auto_ack {
                    self.nack(message.delivery_tag, false).await?;
                }
                Ok(None)
            }
        }
    }

    async fn queue_info(&self, name: &str) -> Result<QueueInfo> {
        let queue = self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("查询队列 {name} 状态失败: {e}")))?;

        Ok(QueueInfo {
            name: name.to_string(),
            message_count: queue.message_count(),
            consumer_count: queue.consumer_count(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    /// 关闭连接
    pub async fn close(&self) -> Result<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    #[instrument(skip(self, message), fields(task_id = message.task_id, priority = message.priority))]
    async fn publish_task(&self, message: &TaskDispatchMessage) -> Result<()> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_priority(message.priority.min(MAX_PRIORITY));
        self.publish(
            &self.config.task_exchange,
            &self.config.task_routing_key,
            message,
            properties,
        )
        .await?;
        debug!("任务 {} 已发布到任务队列", message.task_id);
        Ok(())
    }

    async fn next_task(&self) -> Result<Option<Delivery<TaskDispatchMessage>>> {
        self.get(&self.config.task_queue, false).await
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("确认消息失败: {e}")))
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("拒绝消息失败: {e}")))
    }

    async fn publish_result(&self, message: &TaskResultMessage) -> Result<()> {
        let properties = BasicProperties::default().with_delivery_mode(PERSISTENT);
        self.publish(
            &self.config.result_exchange,
            &self.config.result_routing_key,
            message,
            properties,
        )
        .await
    }

    async fn next_result(&self) -> Result<Option<Delivery<TaskResultMessage>>> {
        self.get(&self.config.result_queue, false).await
    }

    async fn publish_heartbeat(&self, message: &HeartbeatMessage) -> Result<()> {
        let properties = BasicProperties::default().with_delivery_mode(TRANSIENT);
        self.publish(&self.config.heartbeat_exchange, "", message, properties)
            .await
    }

    async fn next_heartbeat(&self) -> Result<Option<HeartbeatMessage>> {
        Ok(self
            .get::<HeartbeatMessage>(&self.config.heartbeat_queue, true)
            .await?
            .map(|d| d.message))
    }

    async fn task_queue_info(&self) -> Result<QueueInfo> {
        self.queue_info(&self.config.task_queue).await
    }

    async fn result_queue_info(&self) -> Result<QueueInfo> {
        self.queue_info(&self.config.result_queue).await
    }
}
