use std::time::Instant;

use diagnosis_core::{
    models::{DiagnosisStatus, DiagnosisType},
    SchedulerResult,
};
use image::RgbImage;
use serde_json::json;

use super::finish;
use crate::{
    imageops::channel_means,
    scoring::{clamp_score, ratio},
    traits::ensure_not_empty,
    AlgorithmConfig, AlgorithmOutput, DiagnosisAlgorithm, ThresholdValue,
};

/// 偏色检测：各通道均值相对整体均值的最大偏差
#[derive(Debug, Default)]
pub struct ColorCastAlgorithm;

impl DiagnosisAlgorithm for ColorCastAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::ColorCast
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let (r, g, b) = channel_means(image);
        let overall = (r + g + b) / 3.0;
        let deviation = [r, g, b]
            .iter()
            .map(|c| (c - overall).abs())
            .fold(0.0, f64::max);

        let threshold = config.threshold("color_cast_threshold", 20.0);
        let severe = config.threshold("color_cast_severe", 50.0);

        let (score, status, message) = if deviation >= severe {
            let score = clamp_score(40.0 - ratio(deviation - severe, severe) * 40.0);
            (
                score,
                DiagnosisStatus::Error,
                format!("严重偏色: 偏差 {deviation:.1} (评分: {score:.1})"),
            )
        } else if deviation >= threshold {
            let score = clamp_score(60.0 - ratio(deviation - threshold, severe - threshold) * 20.0);
            (
                score,
                DiagnosisStatus::Warning,
                format!("轻微偏色: 偏差 {deviation:.1} (评分: {score:.1})"),
            )
        } else {
            let score =
                clamp_score(100.0 - ratio(deviation, threshold) * 40.0).clamp(60.0, 100.0);
            (
                score,
                DiagnosisStatus::Normal,
                format!("色彩正常: 偏差 {deviation:.1} (评分: {score:.1})"),
            )
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(threshold),
            message,
            json!({
                "r_mean": r,
                "g_mean": g,
                "b_mean": b,
                "max_deviation": deviation,
                "raw_score": deviation,
                "normalized_score": score,
            }),
        ))
    }
}
