use async_trait::async_trait;
use diagnosis_core::{models::Camera, traits::CameraRepository, SchedulerResult};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::instrument;

pub struct PostgresCameraRepository {
    pool: PgPool,
}

impl PostgresCameraRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_camera(row: &PgRow) -> SchedulerResult<Camera> {
        Ok(Camera {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            stream_url: row.try_get("stream_url")?,
            location: row.try_get("location")?,
            status: row.try_get("status")?,
            is_active: row.try_get("is_active")?,
        })
    }
}

#[async_trait]
impl CameraRepository for PostgresCameraRepository {
    #[instrument(skip(self), fields(count = ids.len()))]
    async fn find_active_by_ids(&self, ids: &[i64]) -> SchedulerResult<Vec<Camera>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, code, name, stream_url, location, status, is_active FROM cameras \
             WHERE id = ANY($1) AND is_active = TRUE ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_camera).collect()
    }
}
