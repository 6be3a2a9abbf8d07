use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use diagnosis_core::{config::StorageConfig, traits::ObjectStore, SchedulerError, SchedulerResult};
use image::{imageops::FilterType, DynamicImage, ImageFormat, RgbImage};
use tracing::{error, info, warn};

const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// 归档后的图像地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedImage {
    pub image_url: String,
    pub thumbnail_url: String,
}

/// 诊断图像归档
///
/// 优先上传对象存储，失败时写入本地目录并返回相对URL；两者都失败时返回 `None`，
/// 不影响诊断本身。
#[derive(Clone)]
pub struct ImageArchive {
    object_store: Option<Arc<dyn ObjectStore>>,
    bucket: String,
    local_root: PathBuf,
    local_url_prefix: String,
    thumbnail_max: (u32, u32),
}

impl std::fmt::Debug for ImageArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageArchive")
            .field("object_store", &self.object_store.is_some())
            .field("bucket", &self.bucket)
            .field("local_root", &self.local_root)
            .finish()
    }
}

impl ImageArchive {
    pub fn new(config: &StorageConfig, object_store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            object_store,
            bucket: config.bucket.clone(),
            local_root: PathBuf::from(&config.local_root),
            local_url_prefix: config.local_url_prefix.trim_end_matches('/').to_string(),
            thumbnail_max: (config.thumbnail_max_width, config.thumbnail_max_height),
        }
    }

    /// 只写本地目录
    pub fn local(root: impl AsRef<Path>, url_prefix: &str) -> Self {
        let config = StorageConfig {
            local_root: root.as_ref().to_string_lossy().into_owned(),
            local_url_prefix: url_prefix.to_string(),
            ..StorageConfig::default()
        };
        Self::new(&config, None)
    }

    /// 归档一帧图像，`label` 写入文件名用于区分诊断类型
    pub async fn archive(
        &self,
        image: &RgbImage,
        camera_id: i64,
        label: &str,
    ) -> Option<ArchivedImage> {
        let (max_w, max_h) = self.thumbnail_max;
        let source = image.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            let thumbnail = make_thumbnail(&source, max_w, max_h);
            Ok::<_, SchedulerError>((encode_jpeg(source)?, encode_jpeg(thumbnail)?))
        })
        .await;

        let (image_bytes, thumb_bytes) = match encoded {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                error!("诊断图像编码失败: {}", e);
                return None;
            }
            Err(e) => {
                error!("诊断图像编码任务异常: {}", e);
                return None;
            }
        };

        let now = Utc::now();
        if let Some(store) = &self.object_store {
            match self
                .upload(store.as_ref(), camera_id, label, now, &image_bytes, &thumb_bytes)
                .await
            {
                Ok(archived) => return Some(archived),
                Err(e) => warn!("保存诊断图像到对象存储失败，回退到本地存储: {}", e),
            }
        }

        match self
            .save_local(camera_id, label, now, &image_bytes, &thumb_bytes)
            .await
        {
            Ok(archived) => Some(archived),
            Err(e) => {
                error!("本地保存诊断图像失败: {}", e);
                None
            }
        }
    }

    async fn upload(
        &self,
        store: &dyn ObjectStore,
        camera_id: i64,
        label: &str,
        now: DateTime<Utc>,
        image_bytes: &[u8],
        thumb_bytes: &[u8],
    ) -> SchedulerResult<ArchivedImage> {
        let filename = format!(
            "{camera_id}_{label}_{}_{}.jpg",
            now.format("%Y%m%d_%H%M%S"),
            short_id()
        );
        let image_key = format!("images/{filename}");
        let thumb_key = format!("thumbnails/thumb_{filename}");

        let image_url = store
            .put(&self.bucket, &image_key, image_bytes.to_vec(), JPEG_CONTENT_TYPE)
            .await?;
        let thumbnail_url = store
            .put(&self.bucket, &thumb_key, thumb_bytes.to_vec(), JPEG_CONTENT_TYPE)
            .await?;

        info!("成功保存诊断图像到对象存储: {}", image_key);
        Ok(ArchivedImage {
            image_url,
            thumbnail_url,
        })
    }

    async fn save_local(
        &self,
        camera_id: i64,
        label: &str,
        now: DateTime<Utc>,
        image_bytes: &[u8],
        thumb_bytes: &[u8],
    ) -> SchedulerResult<ArchivedImage> {
        let date_dir = now.format("%Y/%m/%d").to_string();
        let dir = self.local_root.join(&date_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SchedulerError::Image(format!("创建图像目录失败: {e}")))?;

        let filename = format!(
            "{camera_id}_{label}_{}_{}.jpg",
            now.format("%H%M%S"),
            short_id()
        );
        let thumb_name = format!("thumb_{filename}");

        tokio::fs::write(dir.join(&filename), image_bytes)
            .await
            .map_err(|e| SchedulerError::Image(format!("写入图像失败: {e}")))?;
        tokio::fs::write(dir.join(&thumb_name), thumb_bytes)
            .await
            .map_err(|e| SchedulerError::Image(format!("写入缩略图失败: {e}")))?;

        info!("使用本地存储保存诊断图像: {}", dir.join(&filename).display());
        Ok(ArchivedImage {
            image_url: format!("{}/{date_dir}/{filename}", self.local_url_prefix),
            thumbnail_url: format!("{}/{date_dir}/{thumb_name}", self.local_url_prefix),
        })
    }
}

fn short_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// 等比缩放到不超过 `max_w` x `max_h`，小图原样返回
fn make_thumbnail(image: &RgbImage, max_w: u32, max_h: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if w <= max_w && h <= max_h {
        return image.clone();
    }
    let scale = (f64::from(max_w) / f64::from(w)).min(f64::from(max_h) / f64::from(h));
    let new_w = ((f64::from(w) * scale) as u32).max(1);
    let new_h = ((f64::from(h) * scale) as u32).max(1);
    image::imageops::resize(image, new_w, new_h, FilterType::Triangle)
}

fn encode_jpeg(image: RgbImage) -> SchedulerResult<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(|e| SchedulerError::Image(format!("JPEG编码失败: {e}")))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnosis_testing_utils::{checkerboard_frame, RecordingObjectStore};

    #[test]
    fn test_thumbnail_keeps_aspect_ratio() {
        let thumb = make_thumbnail(&checkerboard_frame(640, 480, 16), 200, 150);
        assert_eq!(thumb.dimensions(), (200, 150));

        let wide = make_thumbnail(&checkerboard_frame(800, 200, 16), 200, 150);
        assert_eq!(wide.dimensions(), (200, 50));

        let small = make_thumbnail(&checkerboard_frame(100, 80, 16), 200, 150);
        assert_eq!(small.dimensions(), (100, 80));
    }

    #[tokio::test]
    async fn test_object_store_keys() {
        let store = RecordingObjectStore::new();
        let archive = ImageArchive::new(&StorageConfig::default(), Some(Arc::new(store.clone())));

        let archived = archive
            .archive(&checkerboard_frame(320, 240, 16), 5, "brightness")
            .await
            .unwrap();

        let uploads = store.uploads();
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[0].0, "diagnosis-images");
        assert!(uploads[0].1.starts_with("images/5_brightness_"));
        assert!(uploads[1].1.starts_with("thumbnails/thumb_5_brightness_"));
        assert!(archived.image_url.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn test_falls_back_to_local_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            local_root: dir.path().to_string_lossy().into_owned(),
            ..StorageConfig::default()
        };
        let archive = ImageArchive::new(&config, Some(Arc::new(RecordingObjectStore::failing())));

        let archived = archive
            .archive(&checkerboard_frame(320, 240, 16), 9, "clarity")
            .await
            .unwrap();

        assert!(archived.image_url.starts_with("/static/diagnosis_images/"));
        assert!(archived.thumbnail_url.contains("/thumb_9_clarity_"));

        let relative = archived
            .image_url
            .trim_start_matches("/static/diagnosis_images/");
        assert!(dir.path().join(relative).exists());
    }
}
