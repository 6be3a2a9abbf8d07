use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use diagnosis_core::{
    models::{DiagnosisResult, NewDiagnosisResult},
    traits::DiagnosisResultRepository,
    SchedulerResult,
};
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct InMemoryResultRepository {
    results: RwLock<Vec<DiagnosisResult>>,
    next_id: AtomicI64,
}

impl Default for InMemoryResultRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryResultRepository {
    pub fn new() -> Self {
        Self {
            results: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn all(&self) -> Vec<DiagnosisResult> {
        self.results.read().await.clone()
    }
}

#[async_trait]
impl DiagnosisResultRepository for InMemoryResultRepository {
    async fn create(&self, result: NewDiagnosisResult) -> SchedulerResult<DiagnosisResult> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = DiagnosisResult::from_new(id, result, Utc::now());
        self.results.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn list_by_task(&self, task_id: i64) -> SchedulerResult<Vec<DiagnosisResult>> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }
}
