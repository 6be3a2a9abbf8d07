use std::time::Duration;

use async_trait::async_trait;
use diagnosis_core::{
    config::WorkerConfig,
    models::{CompletionReport, HeartbeatSnapshot, TaskPayload, WorkerRegistration},
    SchedulerError, SchedulerResult,
};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Worker与调度中心之间的接口
///
/// 调度中心重启后会遗忘已注册的Worker，此时心跳与领取任务返回 `WorkerNotFound`，
/// 调用方应重新注册。
#[async_trait]
pub trait RegistryApi: Send + Sync {
    async fn register(&self, registration: &WorkerRegistration) -> SchedulerResult<String>;

    async fn heartbeat(&self, node_id: &str, snapshot: &HeartbeatSnapshot) -> SchedulerResult<()>;

    async fn fetch_tasks(&self, node_id: &str, batch_size: u32) -> SchedulerResult<Vec<TaskPayload>>;

    async fn complete_task(&self, task_id: i64, report: &CompletionReport) -> SchedulerResult<()>;

    async fn unregister(&self, node_id: &str) -> SchedulerResult<()>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Registered {
    node_id: String,
}

#[derive(Debug, Deserialize)]
struct FetchedTasks {
    #[serde(default)]
    tasks: Vec<TaskPayload>,
}

/// 调度中心HTTP客户端
pub struct DispatcherClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl DispatcherClient {
    pub fn new(config: &WorkerConfig) -> SchedulerResult<Self> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            base_url: config.master_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// 404映射为 `not_found`，其他非2xx状态映射为网络错误
    async fn check(
        response: Response,
        not_found: impl FnOnce() -> SchedulerError,
    ) -> SchedulerResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        let body = response.text().await.unwrap_or_default();
        Err(SchedulerError::Network(format!("HTTP {status} - {body}")))
    }

    async fn data<T: DeserializeOwned>(response: Response) -> SchedulerResult<Option<T>> {
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| SchedulerError::Serialization(format!("解析调度中心响应失败: {e}")))?;
        Ok(envelope.data)
    }
}

fn network_error(e: reqwest::Error) -> SchedulerError {
    SchedulerError::Network(format!("调度中心连接失败: {e}"))
}

fn worker_not_found(node_id: &str) -> SchedulerError {
    SchedulerError::WorkerNotFound {
        id: node_id.to_string(),
    }
}

#[async_trait]
impl RegistryApi for DispatcherClient {
    async fn register(&self, registration: &WorkerRegistration) -> SchedulerResult<String> {
        let response = self
            .http_client
            .post(self.url("/workers/register"))
            .json(registration)
            .send()
            .await
            .map_err(network_error)?;
        let response = Self::check(response, || {
            SchedulerError::Network("调度中心未提供注册接口".to_string())
        })
        .await?;

        let node_id = Self::data::<Registered>(response)
            .await?
            .map(|r| r.node_id)
            .unwrap_or_else(|| registration.node_id.clone());
        Ok(node_id)
    }

    async fn heartbeat(&self, node_id: &str, snapshot: &HeartbeatSnapshot) -> SchedulerResult<()> {
        let response = self
            .http_client
            .post(self.url(&format!("/workers/{node_id}/heartbeat")))
            .json(snapshot)
            .send()
            .await
            .map_err(network_error)?;
        Self::check(response, || worker_not_found(node_id)).await?;
        debug!("心跳发送成功: {}", node_id);
        Ok(())
    }

    async fn fetch_tasks(&self, node_id: &str, batch_size: u32) -> SchedulerResult<Vec<TaskPayload>> {
        let response = self
            .http_client
            .get(self.url("/tasks/fetch"))
            .query(&[("node_id", node_id.to_string()), ("batch_size", batch_size.to_string())])
            .send()
            .await
            .map_err(network_error)?;
        let response = Self::check(response, || worker_not_found(node_id)).await?;

        Ok(Self::data::<FetchedTasks>(response)
            .await?
            .map(|fetched| fetched.tasks)
            .unwrap_or_default())
    }

    async fn complete_task(&self, task_id: i64, report: &CompletionReport) -> SchedulerResult<()> {
        let response = self
            .http_client
            .post(self.url(&format!("/tasks/{task_id}/complete")))
            .json(report)
            .send()
            .await
            .map_err(network_error)?;
        Self::check(response, || SchedulerError::TaskNotFound { id: task_id }).await?;
        Ok(())
    }

    async fn unregister(&self, node_id: &str) -> SchedulerResult<()> {
        let response = self
            .http_client
            .delete(self.url(&format!("/workers/{node_id}")))
            .send()
            .await
            .map_err(network_error)?;
        Self::check(response, || worker_not_found(node_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = WorkerConfig {
            master_url: "http://master:8000/api/v1/diagnosis/".to_string(),
            ..Default::default()
        };
        let client = DispatcherClient::new(&config).unwrap();
        assert_eq!(
            client.url("/workers/register"),
            "http://master:8000/api/v1/diagnosis/workers/register"
        );
    }

    #[test]
    fn test_envelope_without_data() {
        let envelope: Envelope<FetchedTasks> =
            serde_json::from_str(r#"{"success": true, "message": "ok"}"#).unwrap();
        assert!(envelope.data.is_none());

        let envelope: Envelope<FetchedTasks> =
            serde_json::from_str(r#"{"success": true, "data": {"tasks": []}}"#).unwrap();
        assert!(envelope.data.unwrap().tasks.is_empty());
    }
}
