use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use diagnosis_algorithms::{
    merge_thresholds, AlgorithmConfig, AlgorithmOutput, AlgorithmRegistry, DiagnosisAlgorithm,
};
use diagnosis_core::{
    models::{
        Camera, DiagnosisStatus, DiagnosisType, ExecutionOutcome, ExecutionSummary,
        NewDiagnosisResult, TaskPayload, TaskStatus,
    },
    traits::{
        CameraGroupResolver, CameraRepository, DiagnosisAlarmRepository, DiagnosisResultRepository,
        DiagnosisTaskRepository, ImageSource, NoopGroupResolver,
    },
    SchedulerError, SchedulerResult,
};
use image::RgbImage;
use tracing::{debug, error, info, instrument, warn};

use crate::{records, ArchivedImage, ImageArchive, RunningTasks};

type AlgorithmCache = HashMap<(i64, DiagnosisType), Box<dyn DiagnosisAlgorithm>>;

/// 执行器依赖的仓储
#[derive(Clone)]
pub struct ExecutorRepositories {
    pub tasks: Arc<dyn DiagnosisTaskRepository>,
    pub cameras: Arc<dyn CameraRepository>,
    pub results: Arc<dyn DiagnosisResultRepository>,
    pub alarms: Arc<dyn DiagnosisAlarmRepository>,
}

/// 单个摄像头的诊断计数
#[derive(Debug, Default)]
struct CameraTally {
    results: usize,
    success: usize,
    errors: usize,
}

/// 诊断任务执行器
///
/// 可以被本地调度池、HTTP轮询Worker和队列消费者共享。同一任务ID在
/// 同一进程内同时只会有一次执行。
pub struct DiagnosisExecutor {
    repos: ExecutorRepositories,
    image_source: Arc<dyn ImageSource>,
    group_resolver: Arc<dyn CameraGroupResolver>,
    registry: AlgorithmRegistry,
    archive: Option<ImageArchive>,
    running: RunningTasks,
    /// 冻结、抖动等帧间算法的实例，按 (摄像头, 诊断类型) 保存
    stateful: Mutex<AlgorithmCache>,
}

impl DiagnosisExecutor {
    pub fn builder(
        repos: ExecutorRepositories,
        image_source: Arc<dyn ImageSource>,
    ) -> DiagnosisExecutorBuilder {
        DiagnosisExecutorBuilder::new(repos, image_source)
    }

    /// 进程内运行集合，供卡住任务回收器比对
    pub fn running_tasks(&self) -> &RunningTasks {
        &self.running
    }

    pub fn is_running(&self, task_id: i64) -> bool {
        self.running.contains(task_id)
    }

    /// 按任务ID执行，维护任务行的状态与计数
    #[instrument(skip(self))]
    pub async fn execute_task(&self, task_id: i64) -> ExecutionOutcome {
        let Some(_guard) = self.running.try_acquire(task_id) else {
            warn!("任务 {} 已在运行中，跳过本次执行", task_id);
            return ExecutionOutcome::failed("任务已在运行中");
        };

        match self.run_task(task_id).await {
            Ok(summary) => ExecutionOutcome::Completed(summary),
            Err(e) => {
                error!("执行诊断任务 {} 失败: {}", task_id, e);
                if !e.is_not_found() {
                    if let Err(update_err) = self
                        .repos
                        .tasks
                        .update_status(task_id, TaskStatus::Failed, Some(&e.to_string()))
                        .await
                    {
                        error!("更新任务 {} 失败状态出错: {}", task_id, update_err);
                    }
                }
                ExecutionOutcome::failed(outcome_message(&e))
            }
        }
    }

    /// 按下发的任务负载执行，不读写任务行
    ///
    /// 远程Worker使用：任务状态由调度端根据回报的结果更新。
    #[instrument(skip(self, payload), fields(task_id = payload.task_id))]
    pub async fn execute_payload(&self, payload: &TaskPayload) -> ExecutionOutcome {
        let Some(_guard) = self.running.try_acquire(payload.task_id) else {
            warn!("任务 {} 已在运行中，跳过本次执行", payload.task_id);
            return ExecutionOutcome::failed("任务已在运行中");
        };

        match self.diagnose_payload(payload).await {
            Ok(summary) => ExecutionOutcome::Completed(summary),
            Err(e) => {
                error!("执行诊断任务 {} 失败: {}", payload.task_id, e);
                ExecutionOutcome::failed(outcome_message(&e))
            }
        }
    }

    async fn run_task(&self, task_id: i64) -> SchedulerResult<ExecutionSummary> {
        let task = self
            .repos
            .tasks
            .get_by_id(task_id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id: task_id })?;

        if !task.is_active {
            return Err(SchedulerError::TaskInactive { id: task_id });
        }

        self.repos.tasks.mark_running(task_id, Utc::now()).await?;
        info!("开始执行诊断任务: {} ({})", task.name, task_id);

        let summary = self.diagnose_payload(&TaskPayload::from(&task)).await?;

        let success_count = i32::try_from(summary.success_count).unwrap_or(i32::MAX);
        self.repos
            .tasks
            .record_completion(task_id, success_count)
            .await?;

        info!(
            "诊断任务 {} 执行完成: 结果 {} 条, 成功 {}, 失败 {}",
            task_id, summary.results_count, summary.success_count, summary.error_count
        );
        Ok(summary)
    }

    /// 对任务负载中的全部摄像头运行全部诊断类型
    async fn diagnose_payload(&self, payload: &TaskPayload) -> SchedulerResult<ExecutionSummary> {
        let cameras = self.resolve_cameras(payload).await?;
        if cameras.is_empty() {
            return Err(SchedulerError::NoAvailableCameras {
                task_id: payload.task_id,
            });
        }

        let mut summary = ExecutionSummary {
            success: true,
            ..ExecutionSummary::default()
        };

        for camera in &cameras {
            let tally = self.diagnose_camera(payload, camera).await;
            summary.results_count += tally.results;
            summary.success_count += tally.success;
            summary.error_count += tally.errors;
        }

        Ok(summary)
    }

    /// 摄像头ID与摄像头组展开后的并集，去重后只保留启用的摄像头
    async fn resolve_cameras(&self, payload: &TaskPayload) -> SchedulerResult<Vec<Camera>> {
        let mut ids: BTreeSet<i64> = payload.camera_ids.iter().copied().collect();
        if !payload.camera_groups.is_empty() {
            let expanded = self.group_resolver.resolve(&payload.camera_groups).await?;
            debug!(
                "任务 {} 的摄像头组展开为 {} 个摄像头",
                payload.task_id,
                expanded.len()
            );
            ids.extend(expanded);
        }

        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = ids.into_iter().collect();
        self.repos.cameras.find_active_by_ids(&ids).await
    }

    async fn diagnose_camera(&self, payload: &TaskPayload, camera: &Camera) -> CameraTally {
        let mut tally = CameraTally::default();

        let frame = match self.image_source.acquire(camera).await {
            Ok(frame) => frame,
            Err(failure) => {
                warn!("摄像头 {} 获取图像失败: {}", camera.name, failure);
                let result =
                    records::acquisition_failure(payload, camera, failure.describe(&camera.name));
                if self.save_result(result).await.is_some() {
                    tally.results += 1;
                }
                tally.errors += 1;
                return tally;
            }
        };

        let label = payload
            .diagnosis_types
            .first()
            .map(|t| t.as_str())
            .unwrap_or("unknown");
        let archived = match &self.archive {
            Some(archive) => archive.archive(&frame.image, camera.id, label).await,
            None => None,
        };

        let image = Arc::new(frame.image);
        for &diagnosis_type in &payload.diagnosis_types {
            let merged = merge_thresholds(
                diagnosis_type,
                &payload.algorithm_config(diagnosis_type),
                &payload.threshold_config,
            );
            let config = AlgorithmConfig::new(&merged);

            let saved = match self
                .run_algorithm(camera.id, diagnosis_type, Arc::clone(&image), config)
                .await
            {
                Ok(output) => {
                    self.save_output(
                        payload,
                        camera,
                        diagnosis_type,
                        &output,
                        archived.as_ref(),
                        frame.captured_at,
                    )
                    .await
                }
                Err(e) => {
                    warn!(
                        "摄像头 {} 的 {} 诊断失败: {}",
                        camera.name, diagnosis_type, e
                    );
                    let result = records::algorithm_failure(
                        payload,
                        camera,
                        diagnosis_type,
                        e.to_string(),
                        archived.as_ref(),
                        frame.captured_at,
                    );
                    self.save_result(result).await.map(|_| false)
                }
            };

            match saved {
                Some(true) => {
                    tally.results += 1;
                    tally.success += 1;
                }
                Some(false) => {
                    tally.results += 1;
                    tally.errors += 1;
                }
                None => tally.errors += 1,
            }
        }

        tally
    }

    /// 写入算法结果与告警
    ///
    /// 只有状态为正常的结果返回 `Some(true)`，警告、错误与严重都计为错误。
    async fn save_output(
        &self,
        payload: &TaskPayload,
        camera: &Camera,
        diagnosis_type: DiagnosisType,
        output: &AlgorithmOutput,
        archived: Option<&ArchivedImage>,
        captured_at: DateTime<Utc>,
    ) -> Option<bool> {
        let new = records::algorithm_output(
            payload,
            camera,
            diagnosis_type,
            output,
            archived,
            captured_at,
        );
        let stored = match self.repos.results.create(new).await {
            Ok(stored) => stored,
            Err(e) => {
                error!("保存诊断结果失败: {}", e);
                return None;
            }
        };

        if let Some(alarm) = records::alarm_for(&stored, output, &payload.name) {
            match self.repos.alarms.create(alarm).await {
                Ok(alarm) => info!(
                    "摄像头 {} 产生 {} 告警: {}",
                    camera.name,
                    alarm.severity.as_str(),
                    alarm.title
                ),
                Err(e) => error!("创建告警失败: {}", e),
            }
        }
        Some(output.status == DiagnosisStatus::Normal)
    }

    async fn save_result(&self, result: NewDiagnosisResult) -> Option<()> {
        match self.repos.results.create(result).await {
            Ok(_) => Some(()),
            Err(e) => {
                error!("保存诊断结果失败: {}", e);
                None
            }
        }
    }

    /// 在阻塞线程池上运行算法；帧间算法的实例运行后放回缓存
    async fn run_algorithm(
        &self,
        camera_id: i64,
        diagnosis_type: DiagnosisType,
        image: Arc<RgbImage>,
        config: AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        let key = (camera_id, diagnosis_type);
        let cached = self.cache().remove(&key);
        let mut algorithm = match cached {
            Some(algorithm) => algorithm,
            None => self.registry.create(diagnosis_type)?,
        };

        let (algorithm, output) = tokio::task::spawn_blocking(move || {
            let output = algorithm.diagnose(&image, &config);
            (algorithm, output)
        })
        .await
        .map_err(|e| SchedulerError::Algorithm(format!("算法线程异常: {e}")))?;

        if algorithm.is_stateful() {
            self.cache().insert(key, algorithm);
        }
        output
    }

    fn cache(&self) -> MutexGuard<'_, AlgorithmCache> {
        self.stateful.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 任务级失败返回给调用方的说明
fn outcome_message(error: &SchedulerError) -> String {
    match error {
        SchedulerError::TaskNotFound { .. } => "任务不存在".to_string(),
        SchedulerError::TaskInactive { .. } => "任务未启用".to_string(),
        SchedulerError::TaskAlreadyRunning { .. } => "任务已在运行中".to_string(),
        SchedulerError::NoAvailableCameras { .. } => "没有找到可用的摄像头".to_string(),
        other => other.to_string(),
    }
}

/// 执行器构建器
pub struct DiagnosisExecutorBuilder {
    repos: ExecutorRepositories,
    image_source: Arc<dyn ImageSource>,
    group_resolver: Option<Arc<dyn CameraGroupResolver>>,
    registry: Option<AlgorithmRegistry>,
    archive: Option<ImageArchive>,
    running: Option<RunningTasks>,
}

impl DiagnosisExecutorBuilder {
    pub fn new(repos: ExecutorRepositories, image_source: Arc<dyn ImageSource>) -> Self {
        Self {
            repos,
            image_source,
            group_resolver: None,
            registry: None,
            archive: None,
            running: None,
        }
    }

    pub fn algorithm_registry(mut self, registry: AlgorithmRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn group_resolver(mut self, resolver: Arc<dyn CameraGroupResolver>) -> Self {
        self.group_resolver = Some(resolver);
        self
    }

    /// 不设置时不归档图像
    pub fn image_archive(mut self, archive: ImageArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// 与调度器共享的运行集合
    pub fn running_tasks(mut self, running: RunningTasks) -> Self {
        self.running = Some(running);
        self
    }

    pub fn build(self) -> DiagnosisExecutor {
        DiagnosisExecutor {
            repos: self.repos,
            image_source: self.image_source,
            group_resolver: self
                .group_resolver
                .unwrap_or_else(|| Arc::new(NoopGroupResolver)),
            registry: self.registry.unwrap_or_else(AlgorithmRegistry::standard),
            archive: self.archive,
            running: self.running.unwrap_or_default(),
            stateful: Mutex::new(HashMap::new()),
        }
    }
}
