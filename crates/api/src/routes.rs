use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use diagnosis_core::traits::DiagnosisAlarmRepository;
use diagnosis_dispatcher::{SchedulerStrategy, WorkerRegistry};

use crate::handlers::{
    alarms::acknowledge_alarm,
    health::health_check,
    scheduler::{queue_status, recover_stuck_tasks, scheduler_status},
    tasks::{complete_task, fetch_tasks, submit_task},
    workers::{list_workers, register_worker, unregister_worker, worker_heartbeat, worker_stats},
};

/// API应用状态
///
/// 注册表与调度器共享同一实例，委派与Worker领取看到一致的节点信息。
#[derive(Clone)]
pub struct AppState {
    pub strategy: Arc<dyn SchedulerStrategy>,
    pub registry: Arc<WorkerRegistry>,
    pub alarms: Arc<dyn DiagnosisAlarmRepository>,
}

/// 创建API路由，诊断接口挂在 `base_path` 下
pub fn create_routes(state: AppState, base_path: &str) -> Router {
    let diagnosis = Router::new()
        // Worker接口
        .route("/workers/register", post(register_worker))
        .route("/workers/{id}/heartbeat", post(worker_heartbeat))
        .route("/workers/{id}", delete(unregister_worker))
        .route("/workers", get(list_workers))
        .route("/workers/stats", get(worker_stats))
        .route("/tasks/fetch", get(fetch_tasks))
        .route("/tasks/{id}/complete", post(complete_task))
        // 调度控制
        .route("/tasks/{id}/submit", post(submit_task))
        .route("/scheduler/recover-stuck", post(recover_stuck_tasks))
        .route("/scheduler/status", get(scheduler_status))
        .route("/queue/status", get(queue_status))
        .route("/alarms/{id}/acknowledge", post(acknowledge_alarm))
        .route("/health", get(health_check));

    let base_path = base_path.trim_end_matches('/');
    let router = if base_path.is_empty() {
        diagnosis
    } else {
        Router::new()
            .route("/health", get(health_check))
            .nest(base_path, diagnosis)
    };

    router.with_state(state)
}
