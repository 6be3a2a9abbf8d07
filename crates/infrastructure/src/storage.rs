use std::time::Duration;

use async_trait::async_trait;
use diagnosis_core::{config::StorageConfig, traits::ObjectStore, SchedulerError, SchedulerResult};
use tracing::{debug, instrument};

/// 基于HTTP PUT的对象存储客户端
///
/// 对象地址为 `{endpoint}/{bucket}/{key}`，配置了访问密钥时使用Basic认证。
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<(String, String)>,
}

impl HttpObjectStore {
    pub fn new(config: &StorageConfig) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::ObjectStore(format!("创建HTTP客户端失败: {e}")))?;

        let credentials = match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => Some((access.clone(), secret.clone())),
            _ => None,
        };

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    #[instrument(skip(self, bytes), fields(bucket = %bucket, key = %key, size = bytes.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> SchedulerResult<String> {
        let url = self.object_url(bucket, key);
        let mut request = self
            .client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some((access, secret)) = &self.credentials {
            request = request.basic_auth(access, Some(secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| SchedulerError::ObjectStore(format!("上传对象失败: {e}")))?;

        if !response.status().is_success() {
            return Err(SchedulerError::ObjectStore(format!(
                "上传对象失败，状态码: {}",
                response.status()
            )));
        }

        debug!("对象已上传: {}", url);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_joins_segments() {
        let config = StorageConfig {
            endpoint: "http://minio:9000/".to_string(),
            ..StorageConfig::default()
        };
        let store = HttpObjectStore::new(&config).unwrap();
        assert_eq!(
            store.object_url("diagnosis-images", "/images/a.jpg"),
            "http://minio:9000/diagnosis-images/images/a.jpg"
        );
    }
}
