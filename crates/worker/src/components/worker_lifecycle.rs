use std::sync::Arc;
use std::time::Duration;

use diagnosis_core::{
    config::WorkerConfig, models::WorkerRegistration, SchedulerError, SchedulerResult,
};
use diagnosis_executor::DiagnosisExecutor;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

use super::task_execution::Admission;
use super::{HeartbeatManager, RegistrationSession, RegistryApi, TaskExecutionManager};

const WORKER_CAPABILITIES: &[&str] = &["diagnosis"];

/// 生成节点标识：`<hostname>-<uuid前8位>`
pub fn generate_node_id() -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", local_hostname(), &uuid[..8])
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "worker".to_string())
}

pub fn registration_from_config(config: &WorkerConfig) -> WorkerRegistration {
    let node_id = config.node_id.clone().unwrap_or_else(generate_node_id);
    let node_name = config
        .node_name
        .clone()
        .unwrap_or_else(|| format!("Worker-{}", local_hostname()));

    WorkerRegistration {
        node_id,
        node_name: Some(node_name),
        max_concurrent_tasks: config.max_concurrent_tasks,
        capabilities: WORKER_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        status: Some("online".to_string()),
    }
}

/// HTTP模式Worker：注册、心跳、轮询领取任务、注销
pub struct WorkerLifecycle {
    config: WorkerConfig,
    session: Arc<RegistrationSession>,
    execution: Arc<TaskExecutionManager>,
    heartbeat: Arc<HeartbeatManager>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerLifecycle {
    pub fn new(
        config: WorkerConfig,
        client: Arc<dyn RegistryApi>,
        executor: Arc<DiagnosisExecutor>,
    ) -> Self {
        let registration = registration_from_config(&config);
        let session = Arc::new(RegistrationSession::new(client, registration));
        let execution = Arc::new(TaskExecutionManager::new(
            executor,
            session.clone(),
            config.max_concurrent_tasks,
        ));
        let heartbeat = Arc::new(HeartbeatManager::new(
            session.clone(),
            execution.clone(),
            Duration::from_secs(config.heartbeat_interval_seconds),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            session,
            execution,
            heartbeat,
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn node_id(&self) -> &str {
        self.session.node_id()
    }

    pub fn execution(&self) -> &Arc<TaskExecutionManager> {
        &self.execution
    }

    /// 注册成功后启动心跳与任务轮询
    pub async fn start(&self) -> SchedulerResult<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(SchedulerError::Internal("Worker已在运行".to_string()));
        }

        info!("启动Worker节点: {}", self.node_id());
        self.session
            .register_with_retry(
                self.config.register_retries,
                Duration::from_secs(self.config.register_retry_delay_seconds),
            )
            .await?;

        let heartbeat = self.heartbeat.clone();
        handles.push(tokio::spawn(heartbeat.run(self.shutdown_tx.subscribe())));

        handles.push(tokio::spawn(poll_loop(
            self.session.clone(),
            self.execution.clone(),
            Duration::from_secs(self.config.task_poll_interval_seconds),
            self.config.task_batch_size,
            self.shutdown_tx.subscribe(),
        )));

        info!(
            "Worker {} 已启动，最大并发 {}",
            self.node_id(),
            self.config.max_concurrent_tasks
        );
        Ok(())
    }

    /// 领取并启动一批任务，返回启动数量
    pub async fn poll_once(&self) -> SchedulerResult<usize> {
        poll_tasks(&self.session, &self.execution, self.config.task_batch_size).await
    }

    /// 停止轮询，等待执行中的任务后注销
    pub async fn stop(&self, drain_timeout: Duration) {
        info!("停止Worker节点: {}", self.node_id());
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker后台任务异常退出: {}", e);
            }
        }

        if !self.execution.drain(drain_timeout).await {
            warn!("等待执行中的任务超时");
        }
        self.session.unregister().await;
    }
}

async fn poll_tasks(
    session: &RegistrationSession,
    execution: &TaskExecutionManager,
    batch_size: u32,
) -> SchedulerResult<usize> {
    let slots = execution.available_slots();
    if slots == 0 {
        return Ok(0);
    }

    let tasks = session.fetch_tasks(slots.min(batch_size)).await?;
    let mut started = 0;
    for payload in tasks {
        let task_id = payload.task_id;
        match execution.submit(payload) {
            Admission::Started => started += 1,
            Admission::Duplicate => warn!("任务 {} 已在本节点执行，忽略", task_id),
            Admission::AtCapacity => warn!("本节点已满载，任务 {} 未启动", task_id),
        }
    }
    Ok(started)
}

async fn poll_loop(
    session: Arc<RegistrationSession>,
    execution: Arc<TaskExecutionManager>,
    poll_interval: Duration,
    batch_size: u32,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = interval(poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = poll_tasks(&session, &execution, batch_size).await {
                    error!("领取任务失败: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("任务轮询退出");
                break;
            }
        }
    }
}
