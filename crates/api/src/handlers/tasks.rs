use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use diagnosis_core::models::CompletionReport;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    response::{message, success, success_with_message},
    routes::AppState,
};

const MAX_FETCH_BATCH: usize = 10;

/// 领取任务参数
#[derive(Debug, Deserialize)]
pub struct FetchTasksParams {
    pub node_id: String,
    pub batch_size: Option<usize>,
}

/// Worker领取任务
pub async fn fetch_tasks(
    State(state): State<AppState>,
    Query(params): Query<FetchTasksParams>,
) -> ApiResult<impl IntoResponse> {
    let batch_size = params.batch_size.unwrap_or(1);
    if batch_size == 0 || batch_size > MAX_FETCH_BATCH {
        return Err(ApiError::BadRequest(format!(
            "batch_size必须在1到{MAX_FETCH_BATCH}之间"
        )));
    }

    let tasks = state.registry.fetch_tasks(&params.node_id, batch_size).await?;
    Ok(success(json!({ "tasks": tasks })))
}

/// Worker回报任务完成
pub async fn complete_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(report): Json<CompletionReport>,
) -> ApiResult<impl IntoResponse> {
    state.registry.complete_task(task_id, report).await?;
    Ok(message(format!("任务 {task_id} 完成状态已记录")))
}

/// 立即执行任务
pub async fn submit_task(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.strategy.submit(task_id).await?;
    Ok(success_with_message(outcome, format!("任务 {task_id} 已提交执行")))
}
