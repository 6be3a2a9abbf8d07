use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diagnosis_core::SchedulerError;
use serde::Deserialize;
use tracing::info;

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub user_id: i64,
}

/// 确认告警；已确认的告警保持首次确认的信息
pub async fn acknowledge_alarm(
    State(state): State<AppState>,
    Path(alarm_id): Path<i64>,
    Json(request): Json<AcknowledgeRequest>,
) -> ApiResult<impl IntoResponse> {
    let alarm = state
        .alarms
        .get_by_id(alarm_id)
        .await?
        .ok_or(SchedulerError::AlarmNotFound { id: alarm_id })?;

    if alarm.is_acknowledged {
        return Ok(success(alarm));
    }

    let alarm = state
        .alarms
        .acknowledge(alarm_id, request.user_id, Utc::now())
        .await?;
    info!(alarm_id, user_id = request.user_id, "告警已确认");
    Ok(success(alarm))
}
