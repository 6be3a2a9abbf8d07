use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use diagnosis_core::{config::AppConfig, logging::init_logging};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Dispatcher,
    Worker,
    Api,
    All,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Json,
    Pretty,
}

impl LogFormatArg {
    fn as_str(self) -> &'static str {
        match self {
            LogFormatArg::Json => "json",
            LogFormatArg::Pretty => "pretty",
        }
    }
}

/// 摄像头诊断任务调度系统
#[derive(Debug, Parser)]
#[command(name = "diagnosis-scheduler", version, about = "摄像头诊断任务调度系统")]
struct Cli {
    /// 配置文件路径，未指定时依次尝试默认路径
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 运行模式
    #[arg(short, long, value_enum, default_value = "all")]
    mode: ModeArg,

    /// Worker节点ID，覆盖配置中的 worker.node_id
    #[arg(long, value_name = "ID")]
    node_id: Option<String>,

    /// 日志级别，未指定时使用配置中的 observability.log_level
    #[arg(short, long, value_name = "LEVEL",
          value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，未指定时使用配置中的 observability.log_format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            cli.config.as_deref().unwrap_or("默认路径")
        )
    })?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = cli
        .log_format
        .map(|format| format.as_str().to_string())
        .unwrap_or_else(|| config.observability.log_format.clone());
    init_logging(&log_level, &log_format)?;

    info!("启动摄像头诊断任务调度系统");
    info!("运行模式: {:?}", cli.mode);

    if let Some(node_id) = cli.node_id {
        info!("Worker节点ID: {}", node_id);
        config.worker.node_id = Some(node_id);
    }

    let app_mode = parse_app_mode(cli.mode, &config)?;
    let app = Arc::new(Application::new(config, app_mode).await?);

    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let app = Arc::clone(&app);
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(&shutdown_manager).await {
                error!("应用运行失败: {e:#}");
                shutdown_manager.shutdown().await;
            }
        })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = &mut app_handle => {
            warn!("应用提前退出");
            return Ok(());
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("摄像头诊断任务调度系统已退出");
    Ok(())
}

/// 解析应用运行模式
fn parse_app_mode(mode: ModeArg, config: &AppConfig) -> Result<AppMode> {
    match mode {
        ModeArg::Dispatcher => {
            if !config.dispatcher.enabled {
                return Err(anyhow::anyhow!("Dispatcher模式被禁用，请检查配置"));
            }
            Ok(AppMode::Dispatcher)
        }
        ModeArg::Worker => {
            if !config.worker.enabled {
                return Err(anyhow::anyhow!("Worker模式被禁用，请检查配置"));
            }
            Ok(AppMode::Worker)
        }
        ModeArg::Api => {
            if !config.api.enabled {
                return Err(anyhow::anyhow!("API模式被禁用，请检查配置"));
            }
            Ok(AppMode::Api)
        }
        ModeArg::All => Ok(AppMode::All),
    }
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("安装Ctrl+C信号处理器失败");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("安装SIGTERM信号处理器失败")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_mode_requires_enabled_worker() {
        let mut config = AppConfig::default();
        assert!(parse_app_mode(ModeArg::Worker, &config).is_err());
        config.worker.enabled = true;
        assert_eq!(parse_app_mode(ModeArg::Worker, &config).unwrap(), AppMode::Worker);
        assert_eq!(parse_app_mode(ModeArg::All, &config).unwrap(), AppMode::All);
    }

    #[test]
    fn test_cli_parses_mode_and_node_id() {
        let cli = Cli::parse_from(["diagnosis-scheduler", "--mode", "worker", "--node-id", "edge-01"]);
        assert!(matches!(cli.mode, ModeArg::Worker));
        assert_eq!(cli.node_id.as_deref(), Some("edge-01"));
        assert!(cli.config.is_none());
    }
}
