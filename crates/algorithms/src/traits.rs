use std::fmt;

use diagnosis_core::{
    models::{DiagnosisStatus, DiagnosisType},
    SchedulerError, SchedulerResult,
};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 诊断算法
///
/// 冻结与抖动检测需要和上一帧比较，因此 `diagnose` 接收 `&mut self`。
/// 新建实例的第一次调用总是返回正常。
pub trait DiagnosisAlgorithm: Send {
    fn diagnosis_type(&self) -> DiagnosisType;

    fn diagnose(&mut self, image: &RgbImage, config: &AlgorithmConfig)
        -> SchedulerResult<AlgorithmOutput>;

    /// 是否在多次调用之间保留状态
    fn is_stateful(&self) -> bool {
        false
    }
}

/// 算法配置，阈值位于 `thresholds` 对象下
///
/// 阈值缺失或不是数字时回退到算法默认值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlgorithmConfig {
    thresholds: Map<String, Value>,
}

impl AlgorithmConfig {
    pub fn new(config: &Value) -> Self {
        let thresholds = config
            .get("thresholds")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Self { thresholds }
    }

    pub fn threshold(&self, key: &str, default: f64) -> f64 {
        self.thresholds
            .get(key)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }

    pub fn thresholds(&self) -> &Map<String, Value> {
        &self.thresholds
    }
}

impl From<&Value> for AlgorithmConfig {
    fn from(value: &Value) -> Self {
        Self::new(value)
    }
}

/// 结果中记录的阈值快照
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ThresholdValue {
    Scalar(f64),
    Range { min: f64, max: f64 },
}

impl ThresholdValue {
    /// 单值阈值；区间阈值不写入结果的数值阈值字段
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            ThresholdValue::Scalar(v) => Some(*v),
            ThresholdValue::Range { .. } => None,
        }
    }
}

impl fmt::Display for ThresholdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdValue::Scalar(v) => write!(f, "{v}"),
            ThresholdValue::Range { min, max } => write!(f, "{{\"min\": {min}, \"max\": {max}}}"),
        }
    }
}

/// 单次诊断输出
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlgorithmOutput {
    pub status: DiagnosisStatus,
    pub score: f64,
    pub threshold: ThresholdValue,
    pub message: String,
    /// 毫秒
    pub processing_time: f64,
    pub metrics: Value,
}

/// 空图像无法诊断
pub(crate) fn ensure_not_empty(image: &RgbImage) -> SchedulerResult<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(SchedulerError::Algorithm("图像为空".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_threshold_falls_back_on_missing_or_invalid() {
        let config = AlgorithmConfig::new(&json!({
            "thresholds": {"clarity_min": 80, "noise_max": "high"}
        }));
        assert_eq!(config.threshold("clarity_min", 100.0), 80.0);
        assert_eq!(config.threshold("noise_max", 15.0), 15.0);
        assert_eq!(config.threshold("absent", 1.5), 1.5);

        let empty = AlgorithmConfig::new(&json!({"thresholds": []}));
        assert_eq!(empty.threshold("clarity_min", 100.0), 100.0);
    }

    #[test]
    fn test_threshold_value_scalar() {
        assert_eq!(ThresholdValue::Scalar(0.8).as_scalar(), Some(0.8));
        assert_eq!(
            ThresholdValue::Range {
                min: 30.0,
                max: 220.0
            }
            .as_scalar(),
            None
        );
        let json = serde_json::to_value(ThresholdValue::Range {
            min: 30.0,
            max: 220.0,
        })
        .unwrap();
        assert_eq!(json, json!({"min": 30.0, "max": 220.0}));
    }
}
