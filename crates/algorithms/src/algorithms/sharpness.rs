use std::time::Instant;

use diagnosis_core::{
    models::{DiagnosisStatus, DiagnosisType},
    SchedulerResult,
};
use image::RgbImage;
use serde_json::json;

use super::finish;
use crate::{
    imageops::{gaussian_blur, gradient_magnitude, gray_plane, laplacian, percentile, Plane},
    scoring::{higher_is_better, ratio, severity_bands, Band, Severity},
    traits::ensure_not_empty,
    AlgorithmConfig, AlgorithmOutput, DiagnosisAlgorithm, ThresholdValue,
};

/// 清晰度检测：拉普拉斯方差
#[derive(Debug, Default)]
pub struct ClarityAlgorithm;

impl DiagnosisAlgorithm for ClarityAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Clarity
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let variance = laplacian(&gray_plane(image)).variance();

        let min = config.threshold("clarity_min", 100.0);
        let excellent = config.threshold("clarity_excellent", 500.0);
        let (score, band) = higher_is_better(variance, min, excellent);

        let (status, message) = match band {
            Band::Poor => (
                DiagnosisStatus::Warning,
                format!("图像模糊: {variance:.1} < {min} (评分: {score:.1})"),
            ),
            Band::Excellent => (
                DiagnosisStatus::Normal,
                format!("图像非常清晰: {variance:.1} (评分: {score:.1})"),
            ),
            Band::Acceptable if score >= 70.0 => (
                DiagnosisStatus::Normal,
                format!("图像清晰: {variance:.1} (评分: {score:.1})"),
            ),
            Band::Acceptable => (
                DiagnosisStatus::Warning,
                format!("清晰度一般: {variance:.1} (评分: {score:.1})"),
            ),
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(min),
            message,
            json!({
                "laplacian_variance": variance,
                "raw_score": variance,
                "normalized_score": score,
            }),
        ))
    }
}

/// 焦点模糊检测
///
/// 综合拉普拉斯方差、平均梯度和高频能量占比。高频能量以图像与大尺度
/// 高斯平滑结果的残差近似。
#[derive(Debug, Default)]
pub struct FocusBlurAlgorithm;

fn high_frequency_ratio(gray: &Plane) -> f64 {
    let mean = gray.mean();
    let total: f64 = gray.data.iter().map(|v| (v - mean).abs()).sum();
    let smoothed = gaussian_blur(gray, 3.5);
    let high: f64 = gray.abs_diff(&smoothed).data.iter().sum();
    ratio(high, total).clamp(0.0, 1.0)
}

impl DiagnosisAlgorithm for FocusBlurAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::FocusBlur
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let gray = gray_plane(image);
        let laplacian_var = laplacian(&gray).variance();
        let gradient_mean = gradient_magnitude(&gray).mean();
        let high_freq_ratio = high_frequency_ratio(&gray);

        let focus_score =
            laplacian_var / 1000.0 * 0.4 + gradient_mean / 100.0 * 0.4 + high_freq_ratio * 0.2;

        let min = config.threshold("focus_blur_min", 0.5);
        let excellent = config.threshold("focus_blur_excellent", 2.0);
        let (score, band) = higher_is_better(focus_score, min, excellent);

        let (status, message) = match band {
            Band::Poor => (
                DiagnosisStatus::Warning,
                format!("严重失焦模糊: 焦点评分 {focus_score:.2} (评分: {score:.1})"),
            ),
            Band::Excellent => (
                DiagnosisStatus::Normal,
                format!("焦点清晰: 焦点评分 {focus_score:.2} (评分: {score:.1})"),
            ),
            Band::Acceptable if score >= 85.0 => (
                DiagnosisStatus::Normal,
                format!("焦点良好: 焦点评分 {focus_score:.2} (评分: {score:.1})"),
            ),
            Band::Acceptable => (
                DiagnosisStatus::Warning,
                format!("轻微失焦: 焦点评分 {focus_score:.2} (评分: {score:.1})"),
            ),
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(min),
            message,
            json!({
                "focus_score": focus_score,
                "laplacian_variance": laplacian_var,
                "gradient_mean": gradient_mean,
                "high_freq_ratio": high_freq_ratio,
                "raw_score": focus_score,
                "normalized_score": score,
            }),
        ))
    }
}

/// 镜头脏污检测
#[derive(Debug, Default)]
pub struct LensDirtyAlgorithm;

/// 统计暗斑数量：32x32 分块中均值明显低于全局且纹理平坦的块
fn dark_spot_count(gray: &Plane) -> usize {
    const BLOCK: usize = 32;
    let global_mean = gray.mean();
    if global_mean <= 0.0 || gray.width < BLOCK || gray.height < BLOCK {
        return 0;
    }
    let mut count = 0;
    for by in (0..=gray.height - BLOCK).step_by(BLOCK) {
        for bx in (0..=gray.width - BLOCK).step_by(BLOCK) {
            let mut block = Vec::with_capacity(BLOCK * BLOCK);
            for y in by..by + BLOCK {
                let row = y * gray.width;
                block.extend_from_slice(&gray.data[row + bx..row + bx + BLOCK]);
            }
            let plane = Plane::new(BLOCK, BLOCK, block);
            if plane.mean() < global_mean * 0.6 && plane.std_dev() < 10.0 {
                count += 1;
            }
        }
    }
    count
}

impl DiagnosisAlgorithm for LensDirtyAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::LensDirty
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let gray = gray_plane(image);

        let blur_map = laplacian(&gray).map(f64::abs);
        let blur_threshold = percentile(&blur_map.data, 20.0);
        let blur_ratio = blur_map.ratio_where(|v| v < blur_threshold);

        let brightness_variance = gray.abs_diff(&gaussian_blur(&gray, 3.5)).variance();
        let spots = dark_spot_count(&gray);

        let dirty_score = blur_ratio * 0.4
            + brightness_variance / 1000.0 * 0.4
            + (spots as f64 / 10.0).min(1.0) * 0.2;

        let threshold = config.threshold("lens_dirty_threshold", 0.3);
        let severe = config.threshold("lens_dirty_severe", 0.6);
        let (score, severity) = severity_bands(dirty_score, threshold, severe);

        let (status, message) = match severity {
            Severity::Severe => (
                DiagnosisStatus::Warning,
                format!("镜头严重脏污: 脏污评分 {dirty_score:.2} (评分: {score:.1})"),
            ),
            Severity::Moderate => (
                DiagnosisStatus::Warning,
                format!("镜头轻微脏污: 脏污评分 {dirty_score:.2} (评分: {score:.1})"),
            ),
            Severity::Normal => (
                DiagnosisStatus::Normal,
                format!("镜头清洁: 脏污评分 {dirty_score:.2} (评分: {score:.1})"),
            ),
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(threshold),
            message,
            json!({
                "dirty_score": dirty_score,
                "blur_ratio": blur_ratio,
                "brightness_variance": brightness_variance,
                "dark_spot_count": spots,
                "raw_score": dirty_score,
                "normalized_score": score,
            }),
        ))
    }
}
