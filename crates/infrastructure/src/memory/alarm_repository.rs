use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diagnosis_core::{
    models::{DiagnosisAlarm, NewDiagnosisAlarm},
    traits::DiagnosisAlarmRepository,
    SchedulerError, SchedulerResult,
};
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct InMemoryAlarmRepository {
    alarms: RwLock<Vec<DiagnosisAlarm>>,
    next_id: AtomicI64,
}

impl Default for InMemoryAlarmRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAlarmRepository {
    pub fn new() -> Self {
        Self {
            alarms: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn all(&self) -> Vec<DiagnosisAlarm> {
        self.alarms.read().await.clone()
    }
}

#[async_trait]
impl DiagnosisAlarmRepository for InMemoryAlarmRepository {
    async fn create(&self, alarm: NewDiagnosisAlarm) -> SchedulerResult<DiagnosisAlarm> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = DiagnosisAlarm::from_new(id, alarm, Utc::now());
        self.alarms.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DiagnosisAlarm>> {
        Ok(self.alarms.read().await.iter().find(|a| a.id == id).cloned())
    }

    async fn list_by_result(&self, result_id: i64) -> SchedulerResult<Vec<DiagnosisAlarm>> {
        Ok(self
            .alarms
            .read()
            .await
            .iter()
            .filter(|a| a.result_id == result_id)
            .cloned()
            .collect())
    }

    async fn acknowledge(
        &self,
        id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> SchedulerResult<DiagnosisAlarm> {
        let mut alarms = self.alarms.write().await;
        let alarm = alarms
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(SchedulerError::AlarmNotFound { id })?;
        alarm.is_acknowledged = true;
        alarm.acknowledged_by = Some(user_id);
        alarm.acknowledged_at = Some(at);
        Ok(alarm.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnosis_core::models::{AlarmSeverity, DiagnosisType};

    fn alarm() -> NewDiagnosisAlarm {
        NewDiagnosisAlarm {
            result_id: 1,
            task_id: 1,
            camera_id: 1,
            camera_name: "cam".to_string(),
            alarm_type: Some(DiagnosisType::Noise),
            severity: AlarmSeverity::Error,
            title: "摄像头诊断异常: 噪声过大".to_string(),
            description: String::new(),
            threshold_config: serde_json::json!({}),
            current_value: Some(30.0),
            threshold_value: Some(50.0),
        }
    }

    #[tokio::test]
    async fn test_acknowledge_sets_fields() {
        let repo = InMemoryAlarmRepository::new();
        let created = repo.create(alarm()).await.unwrap();
        let at = Utc::now();

        let acked = repo.acknowledge(created.id, 9, at).await.unwrap();
        assert!(acked.is_acknowledged);
        assert_eq!(acked.acknowledged_by, Some(9));
        assert_eq!(acked.acknowledged_at, Some(at));
        assert_eq!(repo.list_by_result(1).await.unwrap().len(), 1);

        let missing = repo.acknowledge(99, 9, at).await.unwrap_err();
        assert!(matches!(missing, SchedulerError::AlarmNotFound { id: 99 }));
    }
}
