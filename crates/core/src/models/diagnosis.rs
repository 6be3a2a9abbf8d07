use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// 诊断类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisType {
    Brightness,
    BlueScreen,
    Clarity,
    Shake,
    Freeze,
    ColorCast,
    Occlusion,
    Noise,
    Contrast,
    Mosaic,
    FlowerScreen,
    SignalLoss,
    LensDirty,
    FocusBlur,
}

impl DiagnosisType {
    pub const ALL: [DiagnosisType; 14] = [
        DiagnosisType::Brightness,
        DiagnosisType::BlueScreen,
        DiagnosisType::Clarity,
        DiagnosisType::Shake,
        DiagnosisType::Freeze,
        DiagnosisType::ColorCast,
        DiagnosisType::Occlusion,
        DiagnosisType::Noise,
        DiagnosisType::Contrast,
        DiagnosisType::Mosaic,
        DiagnosisType::FlowerScreen,
        DiagnosisType::SignalLoss,
        DiagnosisType::LensDirty,
        DiagnosisType::FocusBlur,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisType::Brightness => "brightness",
            DiagnosisType::BlueScreen => "blue_screen",
            DiagnosisType::Clarity => "clarity",
            DiagnosisType::Shake => "shake",
            DiagnosisType::Freeze => "freeze",
            DiagnosisType::ColorCast => "color_cast",
            DiagnosisType::Occlusion => "occlusion",
            DiagnosisType::Noise => "noise",
            DiagnosisType::Contrast => "contrast",
            DiagnosisType::Mosaic => "mosaic",
            DiagnosisType::FlowerScreen => "flower_screen",
            DiagnosisType::SignalLoss => "signal_loss",
            DiagnosisType::LensDirty => "lens_dirty",
            DiagnosisType::FocusBlur => "focus_blur",
        }
    }

    /// 中文名称
    pub fn display_name(&self) -> &'static str {
        match self {
            DiagnosisType::Brightness => "亮度检测",
            DiagnosisType::BlueScreen => "蓝屏检查",
            DiagnosisType::Clarity => "清晰度检查",
            DiagnosisType::Shake => "抖动检查",
            DiagnosisType::Freeze => "冻结检测",
            DiagnosisType::ColorCast => "偏色检测",
            DiagnosisType::Occlusion => "遮挡检测",
            DiagnosisType::Noise => "噪声检测",
            DiagnosisType::Contrast => "对比度检测",
            DiagnosisType::Mosaic => "马赛克检测",
            DiagnosisType::FlowerScreen => "花屏检测",
            DiagnosisType::SignalLoss => "信号丢失",
            DiagnosisType::LensDirty => "镜头脏污",
            DiagnosisType::FocusBlur => "焦点模糊",
        }
    }
}

impl FromStr for DiagnosisType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiagnosisType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| SchedulerError::UnknownDiagnosisType(s.to_string()))
    }
}

impl fmt::Display for DiagnosisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_varchar_enum!(DiagnosisType);

/// 诊断状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosisStatus {
    Normal,
    Warning,
    Error,
    Critical,
}

impl DiagnosisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisStatus::Normal => "normal",
            DiagnosisStatus::Warning => "warning",
            DiagnosisStatus::Error => "error",
            DiagnosisStatus::Critical => "critical",
        }
    }

    pub fn is_abnormal(&self) -> bool {
        *self != DiagnosisStatus::Normal
    }
}

impl FromStr for DiagnosisStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(DiagnosisStatus::Normal),
            "warning" => Ok(DiagnosisStatus::Warning),
            "error" => Ok(DiagnosisStatus::Error),
            "critical" => Ok(DiagnosisStatus::Critical),
            other => Err(SchedulerError::InvalidTaskParams(format!(
                "无效的诊断状态: {other}"
            ))),
        }
    }
}

impl fmt::Display for DiagnosisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl_varchar_enum!(DiagnosisStatus);

/// 告警严重程度
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlarmSeverity {
    Warning,
    Error,
    Critical,
}

impl AlarmSeverity {
    /// 由诊断状态推导告警级别，正常状态不产生告警
    pub fn from_status(status: DiagnosisStatus) -> Option<Self> {
        match status {
            DiagnosisStatus::Normal => None,
            DiagnosisStatus::Warning => Some(AlarmSeverity::Warning),
            DiagnosisStatus::Error => Some(AlarmSeverity::Error),
            DiagnosisStatus::Critical => Some(AlarmSeverity::Critical),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmSeverity::Warning => "warning",
            AlarmSeverity::Error => "error",
            AlarmSeverity::Critical => "critical",
        }
    }
}

impl FromStr for AlarmSeverity {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warning" => Ok(AlarmSeverity::Warning),
            "error" => Ok(AlarmSeverity::Error),
            "critical" => Ok(AlarmSeverity::Critical),
            other => Err(SchedulerError::InvalidTaskParams(format!(
                "无效的告警级别: {other}"
            ))),
        }
    }
}

impl_varchar_enum!(AlarmSeverity);

/// 待写入的诊断结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDiagnosisResult {
    pub task_id: i64,
    pub camera_id: i64,
    pub camera_name: String,
    /// 图像获取失败时为空
    pub diagnosis_type: Option<DiagnosisType>,
    pub status: DiagnosisStatus,
    pub score: Option<f64>,
    pub threshold: Option<f64>,
    pub is_abnormal: bool,
    pub processing_time: Option<f64>,
    pub error_message: Option<String>,
    pub suggestions: Vec<String>,
    pub metrics: serde_json::Value,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub image_timestamp: Option<DateTime<Utc>>,
    pub result_data: serde_json::Value,
}

/// 诊断结果，写入后不可变
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisResult {
    pub id: i64,
    pub task_id: i64,
    pub camera_id: i64,
    pub camera_name: String,
    pub diagnosis_type: Option<DiagnosisType>,
    pub status: DiagnosisStatus,
    pub score: Option<f64>,
    pub threshold: Option<f64>,
    pub is_abnormal: bool,
    pub processing_time: Option<f64>,
    pub error_message: Option<String>,
    pub suggestions: Vec<String>,
    pub metrics: serde_json::Value,
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub image_timestamp: Option<DateTime<Utc>>,
    pub result_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl DiagnosisResult {
    pub fn from_new(id: i64, new: NewDiagnosisResult, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            task_id: new.task_id,
            camera_id: new.camera_id,
            camera_name: new.camera_name,
            diagnosis_type: new.diagnosis_type,
            status: new.status,
            score: new.score,
            threshold: new.threshold,
            is_abnormal: new.is_abnormal,
            processing_time: new.processing_time,
            error_message: new.error_message,
            suggestions: new.suggestions,
            metrics: new.metrics,
            image_url: new.image_url,
            thumbnail_url: new.thumbnail_url,
            image_timestamp: new.image_timestamp,
            result_data: new.result_data,
            created_at,
        }
    }
}

/// 待写入的诊断告警
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDiagnosisAlarm {
    pub result_id: i64,
    pub task_id: i64,
    pub camera_id: i64,
    pub camera_name: String,
    pub alarm_type: Option<DiagnosisType>,
    pub severity: AlarmSeverity,
    pub title: String,
    pub description: String,
    pub threshold_config: serde_json::Value,
    pub current_value: Option<f64>,
    pub threshold_value: Option<f64>,
}

/// 诊断告警
///
/// 创建后仅允许确认操作修改 `is_acknowledged` 相关字段。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisAlarm {
    pub id: i64,
    pub result_id: i64,
    pub task_id: i64,
    pub camera_id: i64,
    pub camera_name: String,
    pub alarm_type: Option<DiagnosisType>,
    pub severity: AlarmSeverity,
    pub title: String,
    pub description: String,
    pub threshold_config: serde_json::Value,
    pub current_value: Option<f64>,
    pub threshold_value: Option<f64>,
    pub is_acknowledged: bool,
    pub acknowledged_by: Option<i64>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DiagnosisAlarm {
    pub fn from_new(id: i64, new: NewDiagnosisAlarm, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            result_id: new.result_id,
            task_id: new.task_id,
            camera_id: new.camera_id,
            camera_name: new.camera_name,
            alarm_type: new.alarm_type,
            severity: new.severity,
            title: new.title,
            description: new.description,
            threshold_config: new.threshold_config,
            current_value: new.current_value,
            threshold_value: new.threshold_value,
            is_acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at,
        }
    }
}
