use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diagnosis_core::{
    models::{DiagnosisAlarm, NewDiagnosisAlarm},
    traits::DiagnosisAlarmRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info, instrument};

const ALARM_COLUMNS: &str = "id, result_id, task_id, camera_id, camera_name, alarm_type, severity, \
    title, description, threshold_config, current_value, threshold_value, is_acknowledged, \
    acknowledged_by, acknowledged_at, created_at";

pub struct PostgresAlarmRepository {
    pool: PgPool,
}

impl PostgresAlarmRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_alarm(row: &PgRow) -> SchedulerResult<DiagnosisAlarm> {
        Ok(DiagnosisAlarm {
            id: row.try_get("id")?,
            result_id: row.try_get("result_id")?,
            task_id: row.try_get("task_id")?,
            camera_id: row.try_get("camera_id")?,
            camera_name: row.try_get("camera_name")?,
            alarm_type: row.try_get("alarm_type")?,
            severity: row.try_get("severity")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            threshold_config: row.try_get("threshold_config")?,
            current_value: row.try_get("current_value")?,
            threshold_value: row.try_get("threshold_value")?,
            is_acknowledged: row.try_get("is_acknowledged")?,
            acknowledged_by: row.try_get("acknowledged_by")?,
            acknowledged_at: row.try_get("acknowledged_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl DiagnosisAlarmRepository for PostgresAlarmRepository {
    #[instrument(skip(self, alarm), fields(result_id = %alarm.result_id, severity = %alarm.severity.as_str()))]
    async fn create(&self, alarm: NewDiagnosisAlarm) -> SchedulerResult<DiagnosisAlarm> {
        let sql = format!(
            "INSERT INTO diagnosis_alarms (result_id, task_id, camera_id, camera_name, alarm_type, \
             severity, title, description, threshold_config, current_value, threshold_value) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING {ALARM_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(alarm.result_id)
            .bind(alarm.task_id)
            .bind(alarm.camera_id)
            .bind(&alarm.camera_name)
            .bind(alarm.alarm_type)
            .bind(alarm.severity)
            .bind(&alarm.title)
            .bind(&alarm.description)
            .bind(&alarm.threshold_config)
            .bind(alarm.current_value)
            .bind(alarm.threshold_value)
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_alarm(&row)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DiagnosisAlarm>> {
        let sql = format!("SELECT {ALARM_COLUMNS} FROM diagnosis_alarms WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_alarm).transpose()
    }

    async fn list_by_result(&self, result_id: i64) -> SchedulerResult<Vec<DiagnosisAlarm>> {
        let sql = format!(
            "SELECT {ALARM_COLUMNS} FROM diagnosis_alarms WHERE result_id = $1 ORDER BY id"
        );
        let rows = sqlx::query(&sql).bind(result_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_alarm).collect()
    }

    #[instrument(skip(self), fields(alarm_id = %id, user_id = %user_id))]
    async fn acknowledge(
        &self,
        id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> SchedulerResult<DiagnosisAlarm> {
        let sql = format!(
            "UPDATE diagnosis_alarms SET is_acknowledged = TRUE, acknowledged_by = $2, \
             acknowledged_at = $3 WHERE id = $1 RETURNING {ALARM_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(user_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(SchedulerError::AlarmNotFound { id })?;
        info!("告警 {} 已由用户 {} 确认", id, user_id);
        Self::row_to_alarm(&row)
    }
}
