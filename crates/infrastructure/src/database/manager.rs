use std::time::Duration;

use anyhow::{Context, Result};
use diagnosis_core::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{debug, info};

/// 诊断库的PostgreSQL连接池
///
/// 四个仓储共用同一个连接池，迁移脚本位于 `migrations/`。
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await
            .context("无法建立诊断数据库连接池")?;

        info!(
            "诊断数据库已连接，连接池容量 {}-{}",
            config.min_connections, config.max_connections
        );
        Ok(Self { pool })
    }

    /// 包装已有连接池，测试容器使用
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 创建诊断任务、结果、告警与摄像头相关表
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("诊断库迁移失败")?;
        info!("诊断库迁移完成");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        let one: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("诊断数据库不可用")?;
        debug!("数据库健康检查返回 {}", one);
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("诊断数据库连接池已关闭");
    }
}
