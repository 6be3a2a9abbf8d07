use serde::{Deserialize, Serialize};

/// 调度策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStrategyKind {
    /// 轮询数据库，本地执行或委派给HTTP注册的Worker
    HttpPoll,
    /// 发布到消息队列，由队列消费者执行
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub strategy: SchedulerStrategyKind,
    pub poll_interval_seconds: u64,
    /// 本地执行并发上限
    pub local_pool_size: usize,
    pub stuck_task_timeout_minutes: i64,
    /// Worker心跳存活窗口
    pub worker_liveness_seconds: i64,
    pub queue: QueueSchedulerConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: SchedulerStrategyKind::HttpPoll,
            poll_interval_seconds: 60,
            local_pool_size: 5,
            stuck_task_timeout_minutes: 30,
            worker_liveness_seconds: 180,
            queue: QueueSchedulerConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度间隔必须大于0"));
        }

        if self.local_pool_size == 0 {
            return Err(anyhow::anyhow!("本地执行池大小必须大于0"));
        }

        if self.stuck_task_timeout_minutes <= 0 {
            return Err(anyhow::anyhow!("卡住任务超时时间必须大于0"));
        }

        if self.worker_liveness_seconds <= 0 {
            return Err(anyhow::anyhow!("Worker存活窗口必须大于0"));
        }

        self.queue.validate()
    }
}

/// 队列调度模式的参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueSchedulerConfig {
    pub check_interval_seconds: u64,
    pub task_timeout_seconds: i64,
    pub max_retries: i32,
    pub retry_backoff_minutes: i64,
    pub immediate_priority: u8,
}

impl Default for QueueSchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 30,
            task_timeout_seconds: 1800,
            max_retries: 3,
            retry_backoff_minutes: 5,
            immediate_priority: 8,
        }
    }
}

impl QueueSchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("队列检查间隔必须大于0"));
        }

        if self.task_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.max_retries < 0 {
            return Err(anyhow::anyhow!("最大重试次数不能为负数"));
        }

        if self.immediate_priority > 10 {
            return Err(anyhow::anyhow!("立即执行优先级不能超过10"));
        }

        Ok(())
    }
}

/// Worker获取任务的方式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerTransport {
    /// 通过HTTP注册、心跳并轮询领取任务
    Http,
    /// 从消息队列消费任务
    Queue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub transport: WorkerTransport,
    /// 未配置时使用 `<hostname>-<uuid前8位>`
    pub node_id: Option<String>,
    pub node_name: Option<String>,
    pub master_url: String,
    pub max_concurrent_tasks: u32,
    pub heartbeat_interval_seconds: u64,
    pub heartbeat_timeout_seconds: u64,
    pub task_poll_interval_seconds: u64,
    pub task_batch_size: u32,
    pub register_retries: u32,
    pub register_retry_delay_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            transport: WorkerTransport::Http,
            node_id: None,
            node_name: None,
            master_url: "http://localhost:8000/api/v1/diagnosis".to_string(),
            max_concurrent_tasks: 2,
            heartbeat_interval_seconds: 30,
            heartbeat_timeout_seconds: 90,
            task_poll_interval_seconds: 5,
            task_batch_size: 1,
            register_retries: 3,
            register_retry_delay_seconds: 5,
            connect_timeout_seconds: 5,
            request_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.master_url.is_empty() {
            return Err(anyhow::anyhow!("调度中心地址不能为空"));
        }

        if !self.master_url.starts_with("http://") && !self.master_url.starts_with("https://") {
            return Err(anyhow::anyhow!("调度中心地址格式无效: {}", self.master_url));
        }

        if let Some(node_id) = &self.node_id {
            if node_id.trim().is_empty() {
                return Err(anyhow::anyhow!("Worker节点ID不能为空"));
            }
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.task_poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("任务轮询间隔必须大于0"));
        }

        if self.task_batch_size == 0 || self.task_batch_size > 10 {
            return Err(anyhow::anyhow!("单次领取任务数必须在1到10之间"));
        }

        if self.register_retries == 0 {
            return Err(anyhow::anyhow!("注册重试次数必须大于0"));
        }

        Ok(())
    }
}
