use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 初始化全局日志订阅器
///
/// `RUST_LOG` 存在时优先生效。`log_format` 取 `json` 或 `pretty`，
/// 调度中心与Worker的日志都带上事件目标，方便按模块过滤。
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let filter = build_filter(log_level)?;
    let subscriber = tracing_subscriber::registry().with(filter);

    match log_format {
        "json" => subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_target(true),
            )
            .try_init()
            .context("日志系统已初始化或JSON输出配置失败")?,
        "pretty" => subscriber
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .context("日志系统已初始化或控制台输出配置失败")?,
        other => return Err(anyhow::anyhow!("不支持的日志格式: {other}")),
    }

    Ok(())
}

fn build_filter(log_level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("无效的日志级别: {log_level}")),
    }
}
