use std::sync::Arc;
use std::time::Duration;

use diagnosis_core::{
    models::{CompletionReport, HeartbeatSnapshot, TaskPayload, WorkerRegistration},
    SchedulerError, SchedulerResult,
};
use tracing::{info, warn};

use super::RegistryApi;

/// 一个Worker节点在调度中心的注册会话
///
/// 心跳或领取任务收到 `WorkerNotFound` 时自动重新注册，不向上报错。
pub struct RegistrationSession {
    client: Arc<dyn RegistryApi>,
    registration: WorkerRegistration,
}

impl RegistrationSession {
    pub fn new(client: Arc<dyn RegistryApi>, registration: WorkerRegistration) -> Self {
        Self {
            client,
            registration,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.registration.node_id
    }

    pub fn registration(&self) -> &WorkerRegistration {
        &self.registration
    }

    /// 注册，失败时按固定间隔重试
    pub async fn register_with_retry(&self, attempts: u32, delay: Duration) -> SchedulerResult<String> {
        let attempts = attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.client.register(&self.registration).await {
                Ok(node_id) => {
                    info!("Worker {} 注册成功", node_id);
                    return Ok(node_id);
                }
                Err(e) => {
                    warn!("Worker注册失败 ({}/{}): {}", attempt, attempts, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SchedulerError::Internal("Worker注册失败".to_string())))
    }

    async fn reregister(&self) -> SchedulerResult<()> {
        warn!("调度中心未找到Worker {}，重新注册", self.node_id());
        self.client.register(&self.registration).await.map(|_| ())
    }

    pub async fn heartbeat(&self, snapshot: &HeartbeatSnapshot) -> SchedulerResult<()> {
        match self.client.heartbeat(self.node_id(), snapshot).await {
            Err(e) if e.is_not_found() => {
                self.reregister().await?;
                self.client.heartbeat(self.node_id(), snapshot).await
            }
            other => other,
        }
    }

    /// 领取任务；Worker被遗忘时重新注册并在下一轮再领取
    pub async fn fetch_tasks(&self, batch_size: u32) -> SchedulerResult<Vec<TaskPayload>> {
        match self.client.fetch_tasks(self.node_id(), batch_size).await {
            Err(e) if e.is_not_found() => {
                self.reregister().await?;
                Ok(Vec::new())
            }
            other => other,
        }
    }

    pub async fn report_completion(&self, task_id: i64, report: &CompletionReport) -> SchedulerResult<()> {
        self.client.complete_task(task_id, report).await
    }

    /// 注销失败只记录日志
    pub async fn unregister(&self) {
        match self.client.unregister(self.node_id()).await {
            Ok(()) => info!("Worker {} 已注销", self.node_id()),
            Err(e) => warn!("Worker {} 注销失败: {}", self.node_id(), e),
        }
    }
}
