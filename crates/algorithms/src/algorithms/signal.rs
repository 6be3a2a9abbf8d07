//! 信号类故障检测：蓝屏、信号丢失、花屏、马赛克、遮挡

use std::time::Instant;

use diagnosis_core::{
    models::{DiagnosisStatus, DiagnosisType},
    SchedulerResult,
};
use image::RgbImage;
use serde_json::json;

use super::{finish, CANNY_HIGH, CANNY_LOW};
use crate::{
    imageops::{
        canny, channel_histograms, edge_density, gray_plane, high_pass, morph_close, morph_open,
        rgb_to_hsv, straight_line_count, variance,
    },
    scoring::{clamp_score, ratio, severity_bands, Severity},
    traits::ensure_not_empty,
    AlgorithmConfig, AlgorithmOutput, DiagnosisAlgorithm, ThresholdValue,
};

/// 三级分段的状态映射：严重为CRITICAL，轻微为WARNING
fn critical_or_warning(severity: Severity) -> DiagnosisStatus {
    match severity {
        Severity::Severe => DiagnosisStatus::Critical,
        Severity::Moderate => DiagnosisStatus::Warning,
        Severity::Normal => DiagnosisStatus::Normal,
    }
}

/// 蓝屏检测：HSV空间中蓝色像素占比
#[derive(Debug, Default)]
pub struct BlueScreenAlgorithm;

impl DiagnosisAlgorithm for BlueScreenAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::BlueScreen
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let total = f64::from(image.width()) * f64::from(image.height());
        let blue = image
            .pixels()
            .filter(|p| {
                let (h, s, v) = rgb_to_hsv(p.0[0], p.0[1], p.0[2]);
                (100.0..=130.0).contains(&h) && s >= 50.0 && v >= 50.0
            })
            .count() as f64;
        let blue_ratio = ratio(blue, total);

        let threshold = config.threshold("blue_screen_ratio", 0.8);
        let score = if blue_ratio <= threshold {
            100.0 - ratio(blue_ratio, threshold) * 40.0
        } else {
            60.0 - ratio((blue_ratio - threshold).min(threshold), threshold) * 60.0
        };
        let score = clamp_score(score);

        let percent = blue_ratio * 100.0;
        let (status, message) = if blue_ratio > threshold {
            (
                DiagnosisStatus::Critical,
                format!("检测到蓝屏: 蓝色像素占比 {percent:.1}% (评分: {score:.1})"),
            )
        } else if blue_ratio > threshold * 0.5 {
            (
                DiagnosisStatus::Warning,
                format!("蓝色像素偏多: 占比 {percent:.1}% (评分: {score:.1})"),
            )
        } else {
            (
                DiagnosisStatus::Normal,
                format!("未检测到蓝屏: 蓝色像素占比 {percent:.1}% (评分: {score:.1})"),
            )
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(threshold),
            message,
            json!({
                "blue_ratio": blue_ratio,
                "raw_score": blue_ratio,
                "normalized_score": score,
            }),
        ))
    }
}

/// 信号丢失检测：极值像素占比、灰度方差和边缘密度
#[derive(Debug, Default)]
pub struct SignalLossAlgorithm;

impl DiagnosisAlgorithm for SignalLossAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::SignalLoss
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let gray = gray_plane(image);
        let extreme_ratio = gray.ratio_where(|v| !(10.0..=245.0).contains(&v));
        let image_variance = gray.variance();
        let edges = edge_density(&canny(&gray, CANNY_LOW, CANNY_HIGH));

        let loss_score = extreme_ratio * 0.5
            + (1.0 - (image_variance / 1000.0).min(1.0)) * 0.3
            + (1.0 - (edges * 10.0).min(1.0)) * 0.2;

        let threshold = config.threshold("signal_loss_threshold", 0.3);
        let severe = config.threshold("signal_loss_severe", 0.7);
        let (score, severity) = severity_bands(loss_score, threshold, severe);
        let status = critical_or_warning(severity);
        let message = match severity {
            Severity::Severe => format!("信号丢失: 丢失评分 {loss_score:.2} (评分: {score:.1})"),
            Severity::Moderate => {
                format!("信号不稳定: 丢失评分 {loss_score:.2} (评分: {score:.1})")
            }
            Severity::Normal => format!("信号正常: 丢失评分 {loss_score:.2} (评分: {score:.1})"),
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(threshold),
            message,
            json!({
                "signal_loss_score": loss_score,
                "extreme_ratio": extreme_ratio,
                "image_variance": image_variance,
                "edge_density": edges,
                "raw_score": loss_score,
                "normalized_score": score,
            }),
        ))
    }
}

/// 花屏检测
///
/// 直方图方差按 640x480 的参考像素数归一化，使评分与分辨率无关。
#[derive(Debug, Default)]
pub struct FlowerScreenAlgorithm;

const REFERENCE_PIXELS: f64 = 640.0 * 480.0;

impl DiagnosisAlgorithm for FlowerScreenAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::FlowerScreen
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let pixels = f64::from(image.width()) * f64::from(image.height());
        let scale = REFERENCE_PIXELS / pixels;

        let histograms = channel_histograms(image);
        let color_variance = histograms
            .iter()
            .map(|hist| {
                let normalized: Vec<f64> = hist.iter().map(|c| c * scale).collect();
                variance(&normalized)
            })
            .sum::<f64>()
            / 3.0;

        let saturated = image
            .pixels()
            .flat_map(|p| p.0)
            .filter(|&c| c == 0 || c == 255)
            .count() as f64;
        let saturation_ratio = ratio(saturated, pixels * 3.0);

        let filtered = high_pass(&gray_plane(image)).map(|v| v.clamp(0.0, 255.0));
        let noise_level = filtered.std_dev();

        let flower_score = (color_variance / 100_000.0).min(1.0) * 0.4
            + saturation_ratio * 0.3
            + (noise_level / 100.0).min(1.0) * 0.3;

        let threshold = config.threshold("flower_screen_threshold", 0.3);
        let severe = config.threshold("flower_screen_severe", 0.6);
        let (score, severity) = severity_bands(flower_score, threshold, severe);
        let status = critical_or_warning(severity);
        let message = match severity {
            Severity::Severe => {
                format!("严重花屏: 花屏评分 {flower_score:.2} (评分: {score:.1})")
            }
            Severity::Moderate => {
                format!("轻微花屏: 花屏评分 {flower_score:.2} (评分: {score:.1})")
            }
            Severity::Normal => format!("无花屏: 花屏评分 {flower_score:.2} (评分: {score:.1})"),
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(threshold),
            message,
            json!({
                "flower_score": flower_score,
                "color_variance": color_variance,
                "saturation_ratio": saturation_ratio,
                "noise_level": noise_level,
                "raw_score": flower_score,
                "normalized_score": score,
            }),
        ))
    }
}

/// 马赛克检测
///
/// 块状结构用 8x8 开闭运算前后的差异衡量，规则直线用贯穿画面的
/// 水平/垂直边缘线数量衡量。
#[derive(Debug, Default)]
pub struct MosaicAlgorithm;

impl DiagnosisAlgorithm for MosaicAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Mosaic
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let gray = gray_plane(image);
        let blocky = morph_close(&morph_open(&gray, 8), 8);
        let diff_score = gray.abs_diff(&blocky).mean() / 255.0;

        let edges = canny(&gray, CANNY_LOW, CANNY_HIGH);
        let line_count = straight_line_count(&edges, gray.width, gray.height, 0.5);
        let line_density = ratio(line_count as f64, gray.len() as f64 / 10_000.0);

        let mosaic_score = diff_score * 0.6 + (line_density / 10.0).min(1.0) * 0.4;

        let threshold = config.threshold("mosaic_threshold", 0.2);
        let severe = config.threshold("mosaic_severe", 0.5);
        let (score, severity) = severity_bands(mosaic_score, threshold, severe);
        let status = critical_or_warning(severity);
        let message = match severity {
            Severity::Severe => {
                format!("严重马赛克: 马赛克评分 {mosaic_score:.2} (评分: {score:.1})")
            }
            Severity::Moderate => {
                format!("轻微马赛克: 马赛克评分 {mosaic_score:.2} (评分: {score:.1})")
            }
            Severity::Normal => {
                format!("无马赛克: 马赛克评分 {mosaic_score:.2} (评分: {score:.1})")
            }
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(threshold),
            message,
            json!({
                "mosaic_score": mosaic_score,
                "diff_score": diff_score,
                "line_count": line_count,
                "line_density": line_density,
                "raw_score": mosaic_score,
                "normalized_score": score,
            }),
        ))
    }
}

/// 遮挡检测：暗像素占比与边缘稀疏程度
#[derive(Debug, Default)]
pub struct OcclusionAlgorithm;

impl DiagnosisAlgorithm for OcclusionAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Occlusion
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let gray = gray_plane(image);
        let dark_threshold = config.threshold("occlusion_dark_threshold", 30.0);
        let dark_ratio = gray.ratio_where(|v| v < dark_threshold);
        let edges = edge_density(&canny(&gray, CANNY_LOW, CANNY_HIGH));

        let occlusion_score = dark_ratio * 0.7 + (1.0 - edges) * 0.3;

        let threshold = config.threshold("occlusion_threshold", 0.3);
        let severe = config.threshold("occlusion_severe", 0.6);
        let (score, severity) = severity_bands(occlusion_score, threshold, severe);
        let status = critical_or_warning(severity);
        let percent = dark_ratio * 100.0;
        let message = match severity {
            Severity::Severe => format!("严重遮挡: 暗区占比 {percent:.1}% (评分: {score:.1})"),
            Severity::Moderate => format!("部分遮挡: 暗区占比 {percent:.1}% (评分: {score:.1})"),
            Severity::Normal => format!("无遮挡: 暗区占比 {percent:.1}% (评分: {score:.1})"),
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(threshold),
            message,
            json!({
                "occlusion_score": occlusion_score,
                "dark_ratio": dark_ratio,
                "edge_density": edges,
                "raw_score": occlusion_score,
                "normalized_score": score,
            }),
        ))
    }
}
