use std::time::Instant;

use diagnosis_core::{
    models::{DiagnosisStatus, DiagnosisType},
    SchedulerResult,
};
use image::RgbImage;
use serde_json::json;

use super::finish;
use crate::{
    imageops::gray_plane,
    scoring::{clamp_score, higher_is_better, ratio, Band},
    traits::ensure_not_empty,
    AlgorithmConfig, AlgorithmOutput, DiagnosisAlgorithm, ThresholdValue,
};

/// 亮度检测：灰度均值应位于 `[brightness_min, brightness_max]`
#[derive(Debug, Default)]
pub struct BrightnessAlgorithm;

impl DiagnosisAlgorithm for BrightnessAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Brightness
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let gray = gray_plane(image);
        let mean = gray.mean();
        let std = gray.std_dev();

        let min = config.threshold("brightness_min", 30.0);
        let max = config.threshold("brightness_max", 220.0);

        let (raw, status, message) = if mean < min {
            let score = ratio(mean, min) * 60.0;
            (
                score,
                DiagnosisStatus::Error,
                format!("亮度过低: {mean:.1} < {min} (评分: {score:.1})"),
            )
        } else if mean > max {
            let score = 60.0 - ratio(mean - max, 255.0 - max) * 60.0;
            (
                score,
                DiagnosisStatus::Error,
                format!("亮度过高: {mean:.1} > {max} (评分: {score:.1})"),
            )
        } else {
            let optimal = (min + max) / 2.0;
            let score = clamp_score(100.0 - ratio((mean - optimal).abs(), (max - min) / 2.0) * 40.0)
                .clamp(60.0, 100.0);
            if score >= 75.0 {
                (
                    score,
                    DiagnosisStatus::Normal,
                    format!("亮度正常: {mean:.1} (评分: {score:.1})"),
                )
            } else {
                (
                    score,
                    DiagnosisStatus::Warning,
                    format!("亮度偏离最佳值: {mean:.1} (评分: {score:.1})"),
                )
            }
        };

        let score = clamp_score(raw);
        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Range { min, max },
            message,
            json!({
                "mean_brightness": mean,
                "std_brightness": std,
                "raw_score": raw,
                "normalized_score": score,
            }),
        ))
    }
}

/// 对比度检测：灰度标准差
#[derive(Debug, Default)]
pub struct ContrastAlgorithm;

impl DiagnosisAlgorithm for ContrastAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Contrast
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let gray = gray_plane(image);
        let contrast = gray.std_dev();

        let min = config.threshold("contrast_min", 20.0);
        let excellent = config.threshold("contrast_excellent", 60.0);
        let (score, band) = higher_is_better(contrast, min, excellent);

        let (status, message) = match band {
            Band::Poor => (
                DiagnosisStatus::Warning,
                format!("对比度过低: {contrast:.1} < {min} (评分: {score:.1})"),
            ),
            Band::Excellent => (
                DiagnosisStatus::Normal,
                format!("对比度优秀: {contrast:.1} (评分: {score:.1})"),
            ),
            Band::Acceptable if score >= 70.0 => (
                DiagnosisStatus::Normal,
                format!("对比度正常: {contrast:.1} (评分: {score:.1})"),
            ),
            Band::Acceptable => (
                DiagnosisStatus::Warning,
                format!("对比度偏低: {contrast:.1} (评分: {score:.1})"),
            ),
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(min),
            message,
            json!({
                "contrast": contrast,
                "min_value": gray.min(),
                "max_value": gray.max(),
                "raw_score": contrast,
                "normalized_score": score,
            }),
        ))
    }
}
