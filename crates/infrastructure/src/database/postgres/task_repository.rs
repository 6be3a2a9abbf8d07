use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diagnosis_core::{
    models::{DiagnosisTask, DiagnosisType, TaskStatus},
    traits::DiagnosisTaskRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, name, description, camera_ids, camera_groups, diagnosis_types, \
    diagnosis_config, threshold_config, schedule_type, cron_expression, interval_minutes, status, \
    is_active, assigned_worker, started_at, completed_at, last_run_time, next_run_time, total_runs, \
    success_runs, error_message, retry_count, next_retry_at, created_at, updated_at";

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> SchedulerResult<DiagnosisTask> {
        let raw_types: serde_json::Value = row.try_get("diagnosis_types")?;
        let diagnosis_types = match raw_types {
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| SchedulerError::UnknownDiagnosisType(item.to_string()))?
                        .parse::<DiagnosisType>()
                })
                .collect::<SchedulerResult<Vec<_>>>()?,
            serde_json::Value::Null => Vec::new(),
            other => return Err(SchedulerError::UnknownDiagnosisType(other.to_string())),
        };

        Ok(DiagnosisTask {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            camera_ids: row.try_get::<Vec<i64>, _>("camera_ids").unwrap_or_default(),
            camera_groups: row.try_get::<Vec<i64>, _>("camera_groups").unwrap_or_default(),
            diagnosis_types,
            diagnosis_config: row.try_get("diagnosis_config")?,
            threshold_config: row.try_get("threshold_config")?,
            schedule_type: row.try_get("schedule_type")?,
            cron_expression: row.try_get("cron_expression")?,
            interval_minutes: row.try_get("interval_minutes")?,
            status: row.try_get("status")?,
            is_active: row.try_get("is_active")?,
            assigned_worker: row.try_get("assigned_worker")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            last_run_time: row.try_get("last_run_time")?,
            next_run_time: row.try_get("next_run_time")?,
            total_runs: row.try_get("total_runs")?,
            success_runs: row.try_get("success_runs")?,
            error_message: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            next_retry_at: row.try_get("next_retry_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_tasks(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> SchedulerResult<Vec<DiagnosisTask>> {
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    fn ensure_updated(rows_affected: u64, id: i64) -> SchedulerResult<()> {
        if rows_affected == 0 {
            return Err(SchedulerError::TaskNotFound { id });
        }
        Ok(())
    }
}

#[async_trait]
impl DiagnosisTaskRepository for PostgresTaskRepository {
    #[instrument(skip(self, task), fields(task_name = %task.name))]
    async fn create(&self, task: &DiagnosisTask) -> SchedulerResult<DiagnosisTask> {
        let types: Vec<&str> = task.diagnosis_types.iter().map(|t| t.as_str()).collect();
        let sql = format!(
            "INSERT INTO diagnosis_tasks (name, description, camera_ids, camera_groups, diagnosis_types, \
             diagnosis_config, threshold_config, schedule_type, cron_expression, interval_minutes, status, \
             is_active, next_run_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(&task.name)
            .bind(&task.description)
            .bind(&task.camera_ids)
            .bind(&task.camera_groups)
            .bind(serde_json::json!(types))
            .bind(&task.diagnosis_config)
            .bind(&task.threshold_config)
            .bind(task.schedule_type)
            .bind(&task.cron_expression)
            .bind(task.interval_minutes)
            .bind(task.status)
            .bind(task.is_active)
            .bind(task.next_run_time)
            .fetch_one(&self.pool)
            .await?;

        let created = Self::row_to_task(&row)?;
        debug!("创建诊断任务成功: ID {}, 名称: {}", created.id, created.name);
        Ok(created)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DiagnosisTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM diagnosis_tasks WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn list_active(&self) -> SchedulerResult<Vec<DiagnosisTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM diagnosis_tasks WHERE is_active = TRUE ORDER BY id");
        self.fetch_tasks(sqlx::query(&sql)).await
    }

    #[instrument(skip(self))]
    async fn list_by_status(&self, status: TaskStatus) -> SchedulerResult<Vec<DiagnosisTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM diagnosis_tasks WHERE status = $1 ORDER BY id");
        self.fetch_tasks(sqlx::query(&sql).bind(status)).await
    }

    #[instrument(skip(self))]
    async fn list_assigned_to(&self, worker_id: &str) -> SchedulerResult<Vec<DiagnosisTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM diagnosis_tasks WHERE assigned_worker = $1 ORDER BY id"
        );
        self.fetch_tasks(sqlx::query(&sql).bind(worker_id)).await
    }

    async fn list_running_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DiagnosisTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM diagnosis_tasks \
             WHERE status = 'RUNNING' AND started_at IS NOT NULL AND started_at < $1 ORDER BY id"
        );
        self.fetch_tasks(sqlx::query(&sql).bind(cutoff)).await
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn mark_running(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE diagnosis_tasks SET status = 'RUNNING', last_run_time = $2, started_at = $2, \
             completed_at = NULL, error_message = NULL, total_runs = total_runs + 1, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)
    }

    #[instrument(skip(self, error_message), fields(task_id = %id, status = %status))]
    async fn update_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> SchedulerResult<()> {
        let terminal = matches!(
            status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        );
        let result = sqlx::query(
            "UPDATE diagnosis_tasks SET status = $2, error_message = $3, \
             completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error_message)
        .bind(terminal)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn reset_to_pending(&self, id: i64) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE diagnosis_tasks SET status = 'PENDING', assigned_worker = NULL, started_at = NULL, \
             updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)
    }

    #[instrument(skip(self), fields(task_id = %id, worker_id = %worker_id))]
    async fn assign_to_worker(&self, id: i64, worker_id: &str) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE diagnosis_tasks SET status = 'PENDING', assigned_worker = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)
    }

    #[instrument(skip(self), fields(worker_id = %worker_id))]
    async fn claim_pending(
        &self,
        worker_id: &str,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DiagnosisTask>> {
        let sql = format!(
            "UPDATE diagnosis_tasks SET status = 'RUNNING', assigned_worker = $1, \
             started_at = $3, updated_at = NOW() \
             WHERE id IN ( \
                 SELECT id FROM diagnosis_tasks \
                 WHERE status = 'PENDING' AND is_active = TRUE \
                   AND (assigned_worker = $1 OR assigned_worker IS NULL) \
                 ORDER BY (assigned_worker IS NULL), id \
                 LIMIT $2 FOR UPDATE SKIP LOCKED \
             ) RETURNING {TASK_COLUMNS}"
        );
        let mut tasks = self
            .fetch_tasks(
                sqlx::query(&sql)
                    .bind(worker_id)
                    .bind(batch_size as i64)
                    .bind(now),
            )
            .await?;
        tasks.sort_by_key(|t| t.id);
        debug!("Worker {} 领取了 {} 个任务", worker_id, tasks.len());
        Ok(tasks)
    }

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE diagnosis_tasks SET next_run_time = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(next_run_time)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)
    }

    #[instrument(skip(self), fields(task_id = %id))]
    async fn record_completion(&self, id: i64, success_count: i32) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE diagnosis_tasks SET status = 'COMPLETED', success_runs = success_runs + $2, \
             error_message = NULL, completed_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(success_count)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)
    }

    async fn schedule_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            "UPDATE diagnosis_tasks SET retry_count = $2, next_retry_at = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(retry_count)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result.rows_affected(), id)
    }
}
