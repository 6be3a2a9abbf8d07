use async_trait::async_trait;
use diagnosis_core::{
    models::{DiagnosisResult, NewDiagnosisResult},
    traits::DiagnosisResultRepository,
    SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};

const RESULT_COLUMNS: &str = "id, task_id, camera_id, camera_name, diagnosis_type, diagnosis_status, \
    score, threshold, is_abnormal, image_url, thumbnail_url, image_timestamp, processing_time, \
    error_message, suggestions, metrics, result_data, created_at";

pub struct PostgresResultRepository {
    pool: PgPool,
}

impl PostgresResultRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_result(row: &PgRow) -> SchedulerResult<DiagnosisResult> {
        let suggestions: serde_json::Value = row.try_get("suggestions")?;
        Ok(DiagnosisResult {
            id: row.try_get("id")?,
            task_id: row.try_get("task_id")?,
            camera_id: row.try_get("camera_id")?,
            camera_name: row.try_get("camera_name")?,
            diagnosis_type: row.try_get("diagnosis_type")?,
            status: row.try_get("diagnosis_status")?,
            score: row.try_get("score")?,
            threshold: row.try_get("threshold")?,
            is_abnormal: row.try_get("is_abnormal")?,
            processing_time: row.try_get("processing_time")?,
            error_message: row.try_get("error_message")?,
            suggestions: serde_json::from_value(suggestions).unwrap_or_default(),
            metrics: row.try_get("metrics")?,
            image_url: row.try_get("image_url")?,
            thumbnail_url: row.try_get("thumbnail_url")?,
            image_timestamp: row.try_get("image_timestamp")?,
            result_data: row.try_get("result_data")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl DiagnosisResultRepository for PostgresResultRepository {
    #[instrument(skip(self, result), fields(task_id = %result.task_id, camera_id = %result.camera_id))]
    async fn create(&self, result: NewDiagnosisResult) -> SchedulerResult<DiagnosisResult> {
        let sql = format!(
            "INSERT INTO diagnosis_results (task_id, camera_id, camera_name, diagnosis_type, \
             diagnosis_status, score, threshold, is_abnormal, image_url, thumbnail_url, image_timestamp, \
             processing_time, error_message, suggestions, metrics, result_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {RESULT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(result.task_id)
            .bind(result.camera_id)
            .bind(&result.camera_name)
            .bind(result.diagnosis_type)
            .bind(result.status)
            .bind(result.score)
            .bind(result.threshold)
            .bind(result.is_abnormal)
            .bind(&result.image_url)
            .bind(&result.thumbnail_url)
            .bind(result.image_timestamp)
            .bind(result.processing_time)
            .bind(&result.error_message)
            .bind(serde_json::json!(result.suggestions))
            .bind(&result.metrics)
            .bind(&result.result_data)
            .fetch_one(&self.pool)
            .await?;

        let created = Self::row_to_result(&row)?;
        debug!("保存诊断结果: ID {}, 状态: {}", created.id, created.status);
        Ok(created)
    }

    async fn list_by_task(&self, task_id: i64) -> SchedulerResult<Vec<DiagnosisResult>> {
        let sql = format!(
            "SELECT {RESULT_COLUMNS} FROM diagnosis_results WHERE task_id = $1 ORDER BY id"
        );
        let rows = sqlx::query(&sql).bind(task_id).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_result).collect()
    }
}
