use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    api_observability::{ApiConfig, ObservabilityConfig},
    database::DatabaseConfig,
    dispatcher_worker::{DispatcherConfig, WorkerConfig},
    message_queue::MessageQueueConfig,
    storage::StorageConfig,
};

/// 默认配置文件搜索路径
const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/diagnosis.toml",
    "diagnosis.toml",
    "/etc/diagnosis/config.toml",
];

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub message_queue: MessageQueueConfig,
    pub dispatcher: DispatcherConfig,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件与环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. 配置文件（TOML），未指定时依次尝试默认路径
    /// 3. 环境变量覆盖（前缀 `DIAGNOSIS_`，层级分隔符 `__`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("DIAGNOSIS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 序列化为TOML字符串
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;

        self.message_queue
            .validate()
            .context("消息队列配置验证失败")?;

        self.dispatcher
            .validate()
            .context("调度器配置验证失败")?;

        self.worker.validate().context("Worker配置验证失败")?;

        self.api.validate().context("API配置验证失败")?;

        self.storage.validate().context("存储配置验证失败")?;

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SchedulerStrategyKind, WorkerTransport};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dispatcher.poll_interval_seconds, 60);
        assert_eq!(config.dispatcher.local_pool_size, 5);
        assert_eq!(config.dispatcher.worker_liveness_seconds, 180);
        assert_eq!(config.dispatcher.queue.max_retries, 3);
        assert_eq!(config.worker.heartbeat_interval_seconds, 30);
        assert_eq!(config.worker.task_poll_interval_seconds, 5);
        assert_eq!(config.storage.bucket, "diagnosis-images");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            [dispatcher]
            strategy = "queue"
            local_pool_size = 8

            [worker]
            transport = "queue"
            node_id = "edge-01"
        "#;

        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.dispatcher.strategy, SchedulerStrategyKind::Queue);
        assert_eq!(config.dispatcher.local_pool_size, 8);
        assert_eq!(config.dispatcher.poll_interval_seconds, 60);
        assert_eq!(config.worker.transport, WorkerTransport::Queue);
        assert_eq!(config.worker.node_id.as_deref(), Some("edge-01"));
        assert_eq!(config.message_queue.task_queue, "diagnosis.tasks");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let toml_str = r#"
            [worker]
            task_batch_size = 20
        "#;
        assert!(AppConfig::from_toml(toml_str).is_err());

        let toml_str = r#"
            [database]
            url = "mysql://localhost/db"
        "#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = AppConfig::default();
        let toml_str = config.to_toml().unwrap();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [api]
            bind_address = "127.0.0.1:9000"
            "#
        )
        .unwrap();

        let path = file.path().with_extension("toml");
        std::fs::copy(file.path(), &path).unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.api.bind_address, "127.0.0.1:9000");

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AppConfig::load(Some("/nonexistent/diagnosis.toml")).is_err());
    }
}
