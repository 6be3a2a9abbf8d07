use std::time::Duration;

use async_trait::async_trait;
use diagnosis_core::{
    models::{AcquisitionFailure, Camera, Frame},
    traits::ImageSource,
    SchedulerError, SchedulerResult,
};
use image::RgbImage;
use tracing::{debug, warn};

/// 通过快照地址获取摄像头图像
///
/// 支持 `http(s)://` 快照接口与 `file://` 本地图片，
/// RTSP等流协议需要专门的解码服务，这里直接判定为无法获取。
#[derive(Debug, Clone)]
pub struct HttpSnapshotImageSource {
    client: reqwest::Client,
}

impl HttpSnapshotImageSource {
    pub fn new(timeout: Duration) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchedulerError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, AcquisitionFailure> {
        if let Some(path) = url.strip_prefix("file://") {
            return tokio::fs::read(path)
                .await
                .map_err(|e| AcquisitionFailure::Unreachable(format!("读取本地图片失败: {e}")));
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| AcquisitionFailure::Unreachable(format!("请求快照失败: {e}")))?;
            if !response.status().is_success() {
                return Err(AcquisitionFailure::Unreachable(format!(
                    "快照接口返回状态码 {}",
                    response.status()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| AcquisitionFailure::Unreachable(format!("读取快照失败: {e}")))?;
            return Ok(bytes.to_vec());
        }

        Err(AcquisitionFailure::Unreachable("不支持的流协议".to_string()))
    }
}

/// 解码图像字节为RGB帧，空图像视为无效帧
pub async fn decode_frame(bytes: Vec<u8>) -> Result<RgbImage, AcquisitionFailure> {
    let decoded = tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes).map(|img| img.to_rgb8())
    })
    .await
    .map_err(|e| AcquisitionFailure::Unreachable(format!("图像解码任务失败: {e}")))?
    .map_err(|e| AcquisitionFailure::Unreachable(format!("图像解码失败: {e}")))?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(AcquisitionFailure::Unreachable("读取到空帧".to_string()));
    }
    Ok(decoded)
}

#[async_trait]
impl ImageSource for HttpSnapshotImageSource {
    async fn acquire(&self, camera: &Camera) -> Result<Frame, AcquisitionFailure> {
        let url = camera.precheck()?;
        debug!("获取摄像头 {} 图像: {}", camera.name, url);

        let bytes = self.fetch(url).await.inspect_err(|e| {
            warn!("摄像头 {} 图像获取失败: {}", camera.name, e);
        })?;
        let image = decode_frame(bytes).await?;
        Ok(Frame::new(image))
    }
}
