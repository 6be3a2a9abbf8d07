use serde::{Deserialize, Serialize};

/// 诊断图像存储配置
///
/// 对象存储不可用时图像写入本地目录 `local_root`，
/// 并以 `local_url_prefix` 开头的相对URL返回。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub object_store_enabled: bool,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub request_timeout_seconds: u64,
    pub local_root: String,
    pub local_url_prefix: String,
    pub thumbnail_max_width: u32,
    pub thumbnail_max_height: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            object_store_enabled: false,
            endpoint: "http://localhost:9000".to_string(),
            bucket: "diagnosis-images".to_string(),
            access_key: None,
            secret_key: None,
            request_timeout_seconds: 10,
            local_root: "static/diagnosis_images".to_string(),
            local_url_prefix: "/static/diagnosis_images".to_string(),
            thumbnail_max_width: 200,
            thumbnail_max_height: 150,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.object_store_enabled {
            if self.endpoint.is_empty() {
                return Err(anyhow::anyhow!("对象存储地址不能为空"));
            }
            if self.bucket.is_empty() {
                return Err(anyhow::anyhow!("对象存储桶名称不能为空"));
            }
        }

        if self.local_root.is_empty() {
            return Err(anyhow::anyhow!("本地图像目录不能为空"));
        }

        if self.thumbnail_max_width == 0 || self.thumbnail_max_height == 0 {
            return Err(anyhow::anyhow!("缩略图尺寸必须大于0"));
        }

        Ok(())
    }
}
