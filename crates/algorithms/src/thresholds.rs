//! 任务级阈值与算法配置的合并

use diagnosis_core::models::DiagnosisType;
use serde_json::{Map, Value};

/// 把任务的 `threshold_config` 合并进某个诊断类型的算法配置
///
/// 合并顺序：
/// 1. `threshold_config` 的全部键写入 `thresholds`
/// 2. 通用的 `threshold` 按诊断类型换算到对应阈值键
/// 3. `threshold_config[<诊断类型>]` 为对象时覆盖写入
///
/// `threshold_config` 为空对象或不是对象时原样返回算法配置。
pub fn merge_thresholds(
    diagnosis_type: DiagnosisType,
    algorithm_config: &Value,
    threshold_config: &Value,
) -> Value {
    let mut config = match algorithm_config {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    let overrides = match threshold_config.as_object() {
        Some(map) if !map.is_empty() => map,
        _ => return Value::Object(config),
    };

    let mut thresholds = config
        .get("thresholds")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for (key, value) in overrides {
        thresholds.insert(key.clone(), value.clone());
    }

    if let Some(threshold) = overrides.get("threshold").and_then(Value::as_f64) {
        if let Some((key, value)) = generic_threshold(diagnosis_type, threshold) {
            thresholds.insert(key.to_string(), Value::from(value));
        }
    }

    if let Some(Value::Object(specific)) = overrides.get(diagnosis_type.as_str()) {
        for (key, value) in specific {
            thresholds.insert(key.clone(), value.clone());
        }
    }

    config.insert("thresholds".to_string(), Value::Object(thresholds));
    Value::Object(config)
}

/// 通用阈值对应的算法阈值键
///
/// 清晰度的通用阈值是 0..1 的比例，需要换算为拉普拉斯方差下限。
fn generic_threshold(diagnosis_type: DiagnosisType, threshold: f64) -> Option<(&'static str, f64)> {
    match diagnosis_type {
        DiagnosisType::Clarity => Some(("clarity_min", threshold * 100.0)),
        DiagnosisType::Brightness => Some(("brightness_min", threshold)),
        DiagnosisType::Contrast => Some(("contrast_min", threshold)),
        DiagnosisType::Noise => Some(("noise_max", threshold)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generic_threshold_maps_to_clarity_min() {
        let merged = merge_thresholds(DiagnosisType::Clarity, &json!({}), &json!({"threshold": 0.8}));
        let clarity_min = merged["thresholds"]["clarity_min"].as_f64().unwrap();
        assert!((clarity_min - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_generic_threshold_other_types() {
        let tc = json!({"threshold": 25});
        assert_eq!(
            merge_thresholds(DiagnosisType::Brightness, &json!({}), &tc)["thresholds"]["brightness_min"],
            json!(25.0)
        );
        assert_eq!(
            merge_thresholds(DiagnosisType::Noise, &json!({}), &tc)["thresholds"]["noise_max"],
            json!(25.0)
        );
        let occlusion = merge_thresholds(DiagnosisType::Occlusion, &json!({}), &tc);
        assert!(occlusion["thresholds"].get("occlusion_threshold").is_none());
    }

    #[test]
    fn test_type_specific_overrides_win() {
        let algorithm_config = json!({"thresholds": {"clarity_excellent": 400}, "roi": [0, 0]});
        let tc = json!({
            "threshold": 0.8,
            "clarity": {"clarity_min": 120}
        });
        let merged = merge_thresholds(DiagnosisType::Clarity, &algorithm_config, &tc);
        assert_eq!(merged["thresholds"]["clarity_min"], json!(120));
        assert_eq!(merged["thresholds"]["clarity_excellent"], json!(400));
        assert_eq!(merged["roi"], json!([0, 0]));
    }

    #[test]
    fn test_empty_threshold_config_leaves_config_untouched() {
        let algorithm_config = json!({"thresholds": {"noise_max": 10}});
        let merged = merge_thresholds(DiagnosisType::Noise, &algorithm_config, &json!({}));
        assert_eq!(merged, algorithm_config);

        let merged = merge_thresholds(DiagnosisType::Noise, &json!(null), &json!(null));
        assert_eq!(merged, json!({}));
    }
}
