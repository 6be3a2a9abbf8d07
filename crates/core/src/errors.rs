use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("任务未启用: {id}")]
    TaskInactive { id: i64 },

    #[error("任务已在运行中: {id}")]
    TaskAlreadyRunning { id: i64 },

    #[error("没有找到可用的摄像头: 任务 {task_id}")]
    NoAvailableCameras { task_id: i64 },

    #[error("告警未找到: {id}")]
    AlarmNotFound { id: i64 },

    #[error("Worker未找到: {id}")]
    WorkerNotFound { id: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("不支持的诊断类型: {0}")]
    UnknownDiagnosisType(String),

    #[error("诊断算法执行失败: {0}")]
    Algorithm(String),

    #[error("图像处理错误: {0}")]
    Image(String),

    #[error("对象存储错误: {0}")]
    ObjectStore(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),

    #[error("无效的任务参数: {0}")]
    InvalidTaskParams(String),
}

impl SchedulerError {
    /// 是否为资源不存在类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchedulerError::TaskNotFound { .. }
                | SchedulerError::WorkerNotFound { .. }
                | SchedulerError::AlarmNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
