use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diagnosis_core::SchedulerError;
use serde_json::json;

pub const WORKER_NOT_REGISTERED: &str = "Worker不存在，请先注册";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn parts(&self) -> (StatusCode, String, &'static str) {
        match self {
            ApiError::Scheduler(SchedulerError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("任务 {id} 不存在"),
                "TASK_NOT_FOUND",
            ),
            ApiError::Scheduler(SchedulerError::WorkerNotFound { .. }) => (
                StatusCode::NOT_FOUND,
                WORKER_NOT_REGISTERED.to_string(),
                "WORKER_NOT_FOUND",
            ),
            ApiError::Scheduler(SchedulerError::AlarmNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("告警 {id} 不存在"),
                "ALARM_NOT_FOUND",
            ),
            ApiError::Scheduler(SchedulerError::TaskAlreadyRunning { id }) => (
                StatusCode::CONFLICT,
                format!("任务 {id} 已在运行中"),
                "TASK_ALREADY_RUNNING",
            ),
            ApiError::Scheduler(
                e @ (SchedulerError::InvalidTaskParams(_)
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::UnknownDiagnosisType(_)
                | SchedulerError::TaskInactive { .. }
                | SchedulerError::NoAvailableCameras { .. }),
            ) => (StatusCode::BAD_REQUEST, e.to_string(), "BAD_REQUEST"),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {msg}"),
                "BAD_REQUEST",
            ),
            ApiError::Scheduler(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("系统内部错误: {e}"),
                "INTERNAL_ERROR",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error_type) = self.parts();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "data": null,
            "message": message,
            "error": {
                "type": error_type,
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}
