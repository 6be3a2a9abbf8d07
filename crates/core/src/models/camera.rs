use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// 摄像头设备状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Online,
    Offline,
    Maintenance,
    Error,
}

impl CameraStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraStatus::Online => "online",
            CameraStatus::Offline => "offline",
            CameraStatus::Maintenance => "maintenance",
            CameraStatus::Error => "error",
        }
    }
}

impl FromStr for CameraStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(CameraStatus::Online),
            "offline" => Ok(CameraStatus::Offline),
            "maintenance" => Ok(CameraStatus::Maintenance),
            "error" => Ok(CameraStatus::Error),
            other => Err(SchedulerError::InvalidTaskParams(format!(
                "无效的摄像头状态: {other}"
            ))),
        }
    }
}

impl_varchar_enum!(CameraStatus);

/// 诊断所需的摄像头描述
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Camera {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub stream_url: Option<String>,
    pub location: Option<String>,
    pub status: CameraStatus,
    pub is_active: bool,
}

impl Camera {
    /// 在真正拉流之前根据摄像头属性判断是否可以获取图像
    ///
    /// 判断顺序为 离线 -> 未启用 -> 未配置流地址。
    pub fn precheck(&self) -> Result<&str, AcquisitionFailure> {
        if self.status == CameraStatus::Offline {
            return Err(AcquisitionFailure::Offline);
        }
        if !self.is_active {
            return Err(AcquisitionFailure::Disabled);
        }
        match self.stream_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(AcquisitionFailure::NoStreamUrl),
        }
    }

    /// 写入诊断结果 `result_data.camera_info` 的摄像头快照
    pub fn info(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "location": self.location,
            "status": self.status.as_str(),
        })
    }
}

/// 图像获取失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionFailure {
    Offline,
    Disabled,
    NoStreamUrl,
    /// 流地址无法连接或读不到有效帧
    Unreachable(String),
}

impl AcquisitionFailure {
    /// 面向用户的失败说明
    pub fn describe(&self, camera_name: &str) -> String {
        match self {
            AcquisitionFailure::Offline => {
                format!("摄像头 '{camera_name}' 处于离线状态，无法进行诊断")
            }
            AcquisitionFailure::Disabled => {
                format!("摄像头 '{camera_name}' 未启用，请先启用摄像头")
            }
            AcquisitionFailure::NoStreamUrl => {
                format!("摄像头 '{camera_name}' 未配置视频流地址，无法获取图像")
            }
            AcquisitionFailure::Unreachable(_) => {
                format!("摄像头 '{camera_name}' 无法获取有效图像，请检查网络连接和流地址配置")
            }
        }
    }
}

impl fmt::Display for AcquisitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionFailure::Offline => f.write_str("offline"),
            AcquisitionFailure::Disabled => f.write_str("disabled"),
            AcquisitionFailure::NoStreamUrl => f.write_str("no_stream_url"),
            AcquisitionFailure::Unreachable(detail) => write!(f, "unreachable: {detail}"),
        }
    }
}

/// 一帧摄像头图像
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
