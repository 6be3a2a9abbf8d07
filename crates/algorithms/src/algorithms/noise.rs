use std::time::Instant;

use diagnosis_core::{
    models::{DiagnosisStatus, DiagnosisType},
    SchedulerResult,
};
use image::RgbImage;
use serde_json::json;

use super::finish;
use crate::{
    imageops::{gaussian_blur, gray_plane},
    scoring::{lower_is_better, Band},
    traits::ensure_not_empty,
    AlgorithmConfig, AlgorithmOutput, DiagnosisAlgorithm, ThresholdValue,
};

/// 噪声分值超过该值时评分为0
const NOISE_CEILING: f64 = 50.0;

/// 噪声检测：灰度图与 5x5 高斯平滑结果的平均绝对差
#[derive(Debug, Default)]
pub struct NoiseAlgorithm;

impl DiagnosisAlgorithm for NoiseAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Noise
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let gray = gray_plane(image);
        let noise_level = gray.abs_diff(&gaussian_blur(&gray, 1.1)).mean();

        let max = config.threshold("noise_max", 15.0);
        let excellent = config.threshold("noise_excellent", 3.0);
        let (score, band) = lower_is_better(noise_level, excellent, max, NOISE_CEILING);

        let (status, message) = match band {
            Band::Excellent => (
                DiagnosisStatus::Normal,
                format!("图像纯净: 噪声 {noise_level:.2} (评分: {score:.1})"),
            ),
            Band::Acceptable if score >= 70.0 => (
                DiagnosisStatus::Normal,
                format!("噪声正常: {noise_level:.2} (评分: {score:.1})"),
            ),
            Band::Acceptable => (
                DiagnosisStatus::Warning,
                format!("噪声偏高: {noise_level:.2} (评分: {score:.1})"),
            ),
            Band::Poor => (
                DiagnosisStatus::Warning,
                format!("噪声过高: {noise_level:.2} > {max} (评分: {score:.1})"),
            ),
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(max),
            message,
            json!({
                "noise_level": noise_level,
                "raw_score": noise_level,
                "normalized_score": score,
            }),
        ))
    }
}
