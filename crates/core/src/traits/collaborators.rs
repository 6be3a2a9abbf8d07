use async_trait::async_trait;

use crate::{
    models::{AcquisitionFailure, Camera, Frame},
    SchedulerResult,
};

/// 图像获取能力
///
/// 失败不会以错误形式抛出，而是返回可分类的失败原因。
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn acquire(&self, camera: &Camera) -> Result<Frame, AcquisitionFailure>;
}

/// 对象存储
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 上传对象并返回访问URL
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> SchedulerResult<String>;
}

/// 摄像头组展开
///
/// 在任务执行时把摄像头组解析为摄像头ID。
#[async_trait]
pub trait CameraGroupResolver: Send + Sync {
    async fn resolve(&self, group_ids: &[i64]) -> SchedulerResult<Vec<i64>>;
}

/// 不做展开的默认实现
#[derive(Debug, Clone, Default)]
pub struct NoopGroupResolver;

#[async_trait]
impl CameraGroupResolver for NoopGroupResolver {
    async fn resolve(&self, _group_ids: &[i64]) -> SchedulerResult<Vec<i64>> {
        Ok(Vec::new())
    }
}
