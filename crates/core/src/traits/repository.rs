//! 数据仓储层接口定义
//!
//! 调度器需要的查询模式：
//! - 到期任务：`list_active` 后由调度器按调度类型判断
//! - 卡住任务：`list_by_status(Running)` / `list_running_started_before`
//! - 分配给某个Worker的任务：`list_assigned_to`
//!
//! 所有实现都必须是 `Send + Sync`，以 `Arc<dyn ...>` 形式注入各组件。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    models::{
        Camera, DiagnosisAlarm, DiagnosisResult, DiagnosisTask, NewDiagnosisAlarm,
        NewDiagnosisResult, TaskStatus,
    },
    SchedulerResult,
};

/// 诊断任务仓储
#[async_trait]
pub trait DiagnosisTaskRepository: Send + Sync {
    async fn create(&self, task: &DiagnosisTask) -> SchedulerResult<DiagnosisTask>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DiagnosisTask>>;

    /// 所有 `is_active = true` 的任务
    async fn list_active(&self) -> SchedulerResult<Vec<DiagnosisTask>>;

    async fn list_by_status(&self, status: TaskStatus) -> SchedulerResult<Vec<DiagnosisTask>>;

    async fn list_assigned_to(&self, worker_id: &str) -> SchedulerResult<Vec<DiagnosisTask>>;

    /// 处于RUNNING且 `started_at` 早于 `cutoff` 的任务
    async fn list_running_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DiagnosisTask>>;

    /// 标记任务开始执行：RUNNING、`last_run_time`、`started_at`、`total_runs + 1`
    async fn mark_running(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<()>;

    /// 更新任务状态，终态会同时写入 `completed_at`
    async fn update_status(
        &self,
        id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> SchedulerResult<()>;

    /// 重置为PENDING并清除分配的Worker
    async fn reset_to_pending(&self, id: i64) -> SchedulerResult<()>;

    /// 委派给Worker：PENDING + `assigned_worker`
    async fn assign_to_worker(&self, id: i64, worker_id: &str) -> SchedulerResult<()>;

    /// 原子地领取最多 `batch_size` 个PENDING任务，置为RUNNING并写入 `assigned_worker`
    ///
    /// 优先领取已分配给该Worker的任务，其次是未分配的任务。
    async fn claim_pending(
        &self,
        worker_id: &str,
        batch_size: usize,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Vec<DiagnosisTask>>;

    async fn set_next_run_time(
        &self,
        id: i64,
        next_run_time: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()>;

    /// 记录一次执行完成：`success_runs += success_count`，状态COMPLETED
    async fn record_completion(&self, id: i64, success_count: i32) -> SchedulerResult<()>;

    /// 记录失败重试
    async fn schedule_retry(
        &self,
        id: i64,
        retry_count: i32,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()>;
}

/// 摄像头仓储，只读
#[async_trait]
pub trait CameraRepository: Send + Sync {
    /// 按ID查询启用中的摄像头
    async fn find_active_by_ids(&self, ids: &[i64]) -> SchedulerResult<Vec<Camera>>;
}

/// 诊断结果仓储
#[async_trait]
pub trait DiagnosisResultRepository: Send + Sync {
    async fn create(&self, result: NewDiagnosisResult) -> SchedulerResult<DiagnosisResult>;

    async fn list_by_task(&self, task_id: i64) -> SchedulerResult<Vec<DiagnosisResult>>;
}

/// 诊断告警仓储
#[async_trait]
pub trait DiagnosisAlarmRepository: Send + Sync {
    async fn create(&self, alarm: NewDiagnosisAlarm) -> SchedulerResult<DiagnosisAlarm>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<DiagnosisAlarm>>;

    async fn list_by_result(&self, result_id: i64) -> SchedulerResult<Vec<DiagnosisAlarm>>;

    /// 确认告警，告警不存在时返回 `AlarmNotFound`
    async fn acknowledge(
        &self,
        id: i64,
        user_id: i64,
        at: DateTime<Utc>,
    ) -> SchedulerResult<DiagnosisAlarm>;
}
