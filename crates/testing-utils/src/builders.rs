//! Test data builders for creating test entities

use chrono::{DateTime, Utc};
use diagnosis_core::models::{
    Camera, CameraStatus, DiagnosisTask, DiagnosisType, ScheduleType, TaskStatus,
    WorkerRegistration,
};

/// Builder for creating test DiagnosisTask entities
pub struct DiagnosisTaskBuilder {
    task: DiagnosisTask,
}

impl Default for DiagnosisTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosisTaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: DiagnosisTask {
                id: 1,
                name: "test_task".to_string(),
                description: None,
                camera_ids: vec![1],
                camera_groups: vec![],
                diagnosis_types: vec![DiagnosisType::Brightness],
                diagnosis_config: serde_json::json!({}),
                threshold_config: serde_json::json!({}),
                schedule_type: ScheduleType::Interval,
                cron_expression: None,
                interval_minutes: Some(60),
                status: TaskStatus::Pending,
                is_active: true,
                assigned_worker: None,
                started_at: None,
                completed_at: None,
                last_run_time: None,
                next_run_time: None,
                total_runs: 0,
                success_runs: 0,
                error_message: None,
                retry_count: 0,
                next_retry_at: None,
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.task.name = name.to_string();
        self
    }

    pub fn with_cameras(mut self, camera_ids: Vec<i64>) -> Self {
        self.task.camera_ids = camera_ids;
        self
    }

    pub fn with_camera_groups(mut self, groups: Vec<i64>) -> Self {
        self.task.camera_groups = groups;
        self
    }

    pub fn with_types(mut self, types: Vec<DiagnosisType>) -> Self {
        self.task.diagnosis_types = types;
        self
    }

    pub fn with_diagnosis_config(mut self, config: serde_json::Value) -> Self {
        self.task.diagnosis_config = config;
        self
    }

    pub fn with_threshold_config(mut self, config: serde_json::Value) -> Self {
        self.task.threshold_config = config;
        self
    }

    pub fn manual(mut self) -> Self {
        self.task.schedule_type = ScheduleType::Manual;
        self.task.interval_minutes = None;
        self
    }

    pub fn once(mut self) -> Self {
        self.task.schedule_type = ScheduleType::Once;
        self.task.interval_minutes = None;
        self
    }

    pub fn every_minutes(mut self, minutes: i32) -> Self {
        self.task.schedule_type = ScheduleType::Interval;
        self.task.interval_minutes = Some(minutes);
        self
    }

    pub fn cron(mut self, expression: &str) -> Self {
        self.task.schedule_type = ScheduleType::Cron;
        self.task.cron_expression = Some(expression.to_string());
        self.task.interval_minutes = None;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.task.is_active = false;
        self
    }

    pub fn assigned_to(mut self, worker_id: &str) -> Self {
        self.task.assigned_worker = Some(worker_id.to_string());
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.started_at = Some(at);
        self
    }

    pub fn last_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.last_run_time = Some(at);
        self
    }

    pub fn next_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.next_run_time = Some(at);
        self
    }

    pub fn with_retry(mut self, retry_count: i32, next_retry_at: Option<DateTime<Utc>>) -> Self {
        self.task.retry_count = retry_count;
        self.task.next_retry_at = next_retry_at;
        self
    }

    pub fn build(self) -> DiagnosisTask {
        self.task
    }
}

/// Builder for creating test Camera entities
pub struct CameraBuilder {
    camera: Camera,
}

impl CameraBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            camera: Camera {
                id,
                code: format!("CAM-{id:03}"),
                name: format!("camera-{id}"),
                stream_url: Some(format!("rtsp://10.0.0.{id}/stream")),
                location: Some("test site".to_string()),
                status: CameraStatus::Online,
                is_active: true,
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.camera.name = name.to_string();
        self
    }

    pub fn with_stream_url(mut self, url: Option<&str>) -> Self {
        self.camera.stream_url = url.map(str::to_string);
        self
    }

    pub fn offline(mut self) -> Self {
        self.camera.status = CameraStatus::Offline;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.camera.is_active = false;
        self
    }

    pub fn build(self) -> Camera {
        self.camera
    }
}

/// Builder for worker registration requests
pub struct WorkerRegistrationBuilder {
    registration: WorkerRegistration,
}

impl WorkerRegistrationBuilder {
    pub fn new(node_id: &str) -> Self {
        Self {
            registration: WorkerRegistration {
                node_id: node_id.to_string(),
                node_name: Some(format!("Worker-{node_id}")),
                max_concurrent_tasks: 2,
                capabilities: vec!["diagnosis".to_string()],
                status: Some("online".to_string()),
            },
        }
    }

    pub fn capacity(mut self, max_concurrent_tasks: u32) -> Self {
        self.registration.max_concurrent_tasks = max_concurrent_tasks;
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.registration.node_name = Some(name.to_string());
        self
    }

    pub fn build(self) -> WorkerRegistration {
        self.registration
    }
}
