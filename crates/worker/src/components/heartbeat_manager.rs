use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, error, info};

use super::{RegistrationSession, TaskExecutionManager};

/// 周期性向调度中心上报心跳
pub struct HeartbeatManager {
    session: Arc<RegistrationSession>,
    execution: Arc<TaskExecutionManager>,
    heartbeat_interval: Duration,
}

impl HeartbeatManager {
    pub fn new(
        session: Arc<RegistrationSession>,
        execution: Arc<TaskExecutionManager>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            session,
            execution,
            heartbeat_interval,
        }
    }

    /// 发送一次心跳，失败只记录日志
    pub async fn beat(&self) {
        let snapshot = self.execution.snapshot();
        match self.session.heartbeat(&snapshot).await {
            Ok(()) => debug!(
                "心跳已发送: {} (执行中 {})",
                self.session.node_id(),
                snapshot.running_task_ids.len()
            ),
            Err(e) => error!("发送心跳失败: {}", e),
        }
    }

    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut ticker = interval(self.heartbeat_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.beat().await,
                _ = shutdown_rx.recv() => {
                    info!("心跳任务退出");
                    break;
                }
            }
        }
    }
}
