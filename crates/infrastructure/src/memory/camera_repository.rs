use std::collections::BTreeMap;

use async_trait::async_trait;
use diagnosis_core::{models::Camera, traits::CameraRepository, SchedulerResult};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryCameraRepository {
    cameras: RwLock<BTreeMap<i64, Camera>>,
}

impl InMemoryCameraRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cameras(cameras: impl IntoIterator<Item = Camera>) -> Self {
        Self {
            cameras: RwLock::new(cameras.into_iter().map(|c| (c.id, c)).collect()),
        }
    }

    pub async fn insert(&self, camera: Camera) {
        self.cameras.write().await.insert(camera.id, camera);
    }
}

#[async_trait]
impl CameraRepository for InMemoryCameraRepository {
    async fn find_active_by_ids(&self, ids: &[i64]) -> SchedulerResult<Vec<Camera>> {
        let cameras = self.cameras.read().await;
        Ok(cameras
            .values()
            .filter(|c| c.is_active && ids.contains(&c.id))
            .cloned()
            .collect())
    }
}
