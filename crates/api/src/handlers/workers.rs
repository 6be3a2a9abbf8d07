//! Worker接口：注册、心跳、注销，以及节点列表与统计
//!
//! 这些接口供Worker节点调用，不做调用方认证。

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use diagnosis_core::models::{HeartbeatSnapshot, WorkerRegistration};
use serde_json::json;
use tracing::info;

use crate::{
    error::{ApiError, ApiResult},
    response::{message, success, success_with_message},
    routes::AppState,
};

pub async fn register_worker(
    State(state): State<AppState>,
    Json(registration): Json<WorkerRegistration>,
) -> ApiResult<impl IntoResponse> {
    if registration.node_id.trim().is_empty() {
        return Err(ApiError::BadRequest("node_id不能为空".to_string()));
    }

    let node_id = state.registry.register(registration).await?;
    info!("Worker注册请求处理完成: {}", node_id);
    Ok(success_with_message(json!({ "node_id": node_id }), "Worker注册成功"))
}

pub async fn worker_heartbeat(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(snapshot): Json<HeartbeatSnapshot>,
) -> ApiResult<impl IntoResponse> {
    state.registry.heartbeat(&node_id, snapshot).await?;
    Ok(message("心跳已接收"))
}

pub async fn unregister_worker(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.registry.unregister(&node_id).await?;
    Ok(message(format!("Worker {node_id} 已注销")))
}

pub async fn list_workers(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.registry.list_workers().await))
}

pub async fn worker_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.registry.stats().await))
}
