use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::DiagnosisType;
use crate::SchedulerError;

/// 默认的间隔调度分钟数
pub const DEFAULT_INTERVAL_MINUTES: i64 = 60;

/// 诊断任务
///
/// 一个诊断任务绑定一组摄像头与一组诊断类型，按调度类型周期或单次执行。
///
/// # 字段说明
///
/// - `camera_ids` / `camera_groups`: 目标摄像头及摄像头组
/// - `diagnosis_config`: 以诊断类型为键的算法配置
/// - `threshold_config`: 运行时合并进算法配置的阈值覆盖
/// - `status` 与执行器的运行集合共同表示任务是否在执行，两者可能短暂不一致，
///   由卡住任务回收器负责修复
/// - `retry_count` / `next_retry_at`: 队列调度模式下的失败重试记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisTask {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub camera_ids: Vec<i64>,
    pub camera_groups: Vec<i64>,
    pub diagnosis_types: Vec<DiagnosisType>,
    pub diagnosis_config: serde_json::Value,
    pub threshold_config: serde_json::Value,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_minutes: Option<i32>,
    pub status: TaskStatus,
    pub is_active: bool,
    pub assigned_worker: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_run_time: Option<DateTime<Utc>>,
    pub next_run_time: Option<DateTime<Utc>>,
    pub total_runs: i32,
    pub success_runs: i32,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiagnosisTask {
    /// 间隔调度的分钟数，未配置时取默认值
    pub fn interval(&self) -> Duration {
        let minutes = self
            .interval_minutes
            .filter(|m| *m > 0)
            .map(i64::from)
            .unwrap_or(DEFAULT_INTERVAL_MINUTES);
        Duration::minutes(minutes)
    }

    /// 周期性任务（interval / cron）
    pub fn is_recurring(&self) -> bool {
        matches!(self.schedule_type, ScheduleType::Interval | ScheduleType::Cron)
    }

    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    /// 诊断类型对应的算法配置，不存在时返回空对象
    pub fn algorithm_config(&self, diagnosis_type: DiagnosisType) -> serde_json::Value {
        config_for(&self.diagnosis_config, diagnosis_type)
    }
}

fn config_for(diagnosis_config: &serde_json::Value, diagnosis_type: DiagnosisType) -> serde_json::Value {
    diagnosis_config
        .get(diagnosis_type.as_str())
        .filter(|v| v.is_object())
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}))
}

/// 调度类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleType {
    /// 仅手动触发，不会被自动调度
    Manual,
    /// 仅执行一次
    Once,
    /// 固定间隔
    Interval,
    /// CRON表达式
    Cron,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Manual => "manual",
            ScheduleType::Once => "once",
            ScheduleType::Interval => "interval",
            ScheduleType::Cron => "cron",
        }
    }
}

impl FromStr for ScheduleType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(ScheduleType::Manual),
            "once" => Ok(ScheduleType::Once),
            "interval" => Ok(ScheduleType::Interval),
            "cron" => Ok(ScheduleType::Cron),
            other => Err(SchedulerError::InvalidTaskParams(format!(
                "无效的调度类型: {other}"
            ))),
        }
    }
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_varchar_enum!(ScheduleType);

/// 任务运行状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "FAILED" => Ok(TaskStatus::Failed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            other => Err(SchedulerError::InvalidTaskParams(format!(
                "无效的任务状态: {other}"
            ))),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_varchar_enum!(TaskStatus);

/// 下发给Worker的任务负载
///
/// 远程Worker依据该负载在本地执行诊断，不需要再次读取任务表。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskPayload {
    pub task_id: i64,
    pub name: String,
    pub camera_ids: Vec<i64>,
    pub camera_groups: Vec<i64>,
    pub diagnosis_types: Vec<DiagnosisType>,
    pub diagnosis_config: serde_json::Value,
    pub threshold_config: serde_json::Value,
    pub schedule_type: ScheduleType,
}

impl TaskPayload {
    pub fn algorithm_config(&self, diagnosis_type: DiagnosisType) -> serde_json::Value {
        config_for(&self.diagnosis_config, diagnosis_type)
    }
}

impl From<&DiagnosisTask> for TaskPayload {
    fn from(task: &DiagnosisTask) -> Self {
        Self {
            task_id: task.id,
            name: task.name.clone(),
            camera_ids: task.camera_ids.clone(),
            camera_groups: task.camera_groups.clone(),
            diagnosis_types: task.diagnosis_types.clone(),
            diagnosis_config: task.diagnosis_config.clone(),
            threshold_config: task.threshold_config.clone(),
            schedule_type: task.schedule_type,
        }
    }
}

/// 任务执行完成后的汇总
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionSummary {
    pub success: bool,
    pub results_count: usize,
    pub success_count: usize,
    pub error_count: usize,
}

/// 一次执行的结果：汇总或任务级错误信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    Completed(ExecutionSummary),
    Failed { error: String },
}

impl ExecutionOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        ExecutionOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed(summary) if summary.success)
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Failed { error } => Some(error),
            ExecutionOutcome::Completed(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_schedule_type_serde_lowercase() {
        let json = serde_json::to_string(&ScheduleType::Interval).unwrap();
        assert_eq!(json, "\"interval\"");
        let parsed: ScheduleType = serde_json::from_str("\"cron\"").unwrap();
        assert_eq!(parsed, ScheduleType::Cron);
    }

    #[test]
    fn test_outcome_untagged_shape() {
        let failed = ExecutionOutcome::failed("任务不存在");
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value, serde_json::json!({"error": "任务不存在"}));

        let ok = ExecutionOutcome::Completed(ExecutionSummary {
            success: true,
            results_count: 2,
            success_count: 2,
            error_count: 0,
        });
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["results_count"], 2);
        assert!(ok.is_success());
    }
}
