//! # Diagnosis API
//!
//! 摄像头诊断调度的HTTP接口，基于Axum构建。
//!
//! ## API 端点（默认前缀 `/api/v1/diagnosis`）
//!
//! ### Worker接口（无需认证）
//! - `POST /workers/register` - 注册Worker，返回 `{node_id}`
//! - `POST /workers/{id}/heartbeat` - 心跳，未注册返回404
//! - `DELETE /workers/{id}` - 注销
//! - `GET /tasks/fetch?node_id=&batch_size=` - 领取任务，返回 `{tasks}`
//! - `POST /tasks/{id}/complete` - 回报执行结果
//!
//! ### 调度控制
//! - `POST /tasks/{id}/submit` - 立即执行
//! - `POST /scheduler/recover-stuck?force=` - 回收卡住的任务
//! - `GET /scheduler/status` - 调度器状态
//! - `GET /queue/status` - 队列状态（队列调度模式）
//! - `GET /workers`、`GET /workers/stats` - 节点列表与统计
//! - `POST /alarms/{id}/acknowledge` - 确认告警
//!
//! 所有成功响应使用 `{success, data, message, timestamp}` 信封。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use diagnosis_core::{config::ApiConfig, SchedulerError, SchedulerResult};
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tracing::info;

use middleware::{cors_layer, request_logging, trace_layer};
pub use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(state: AppState, config: &ApiConfig) -> Router {
    let router = create_routes(state, &config.base_path)
        .layer(axum::middleware::from_fn(request_logging))
        .layer(trace_layer());

    if config.cors_enabled {
        router.layer(ServiceBuilder::new().layer(cors_layer(&config.cors_origins)))
    } else {
        router
    }
}

/// 监听地址并提供服务，收到关闭信号后停止接收新连接
pub async fn serve(
    app: Router,
    bind_address: &str,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> SchedulerResult<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| SchedulerError::Network(format!("绑定地址 {bind_address} 失败: {e}")))?;
    info!("API服务监听于 {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(|e| SchedulerError::Network(format!("API服务异常退出: {e}")))?;

    info!("API服务已停止");
    Ok(())
}
