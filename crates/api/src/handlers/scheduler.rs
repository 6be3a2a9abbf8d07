use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{
    error::ApiResult,
    response::{success, success_with_message, ApiResponse},
    routes::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct RecoverParams {
    #[serde(default)]
    pub force: bool,
}

/// 手动触发卡住任务回收
pub async fn recover_stuck_tasks(
    State(state): State<AppState>,
    Query(params): Query<RecoverParams>,
) -> ApiResult<impl IntoResponse> {
    let report = state.strategy.recover_stuck_tasks(params.force).await?;
    let summary = format!("检查 {} 个任务，重置 {} 个", report.checked, report.reset);
    Ok(success_with_message(report, summary))
}

pub async fn scheduler_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.strategy.status().await))
}

pub async fn queue_status(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let response = match state.strategy.queue_status().await? {
        Some(status) => ApiResponse::success(Some(status)),
        None => ApiResponse::success_with_message(None, "当前调度策略不使用消息队列"),
    };
    Ok(response)
}
