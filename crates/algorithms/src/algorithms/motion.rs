//! 帧间比较类算法
//!
//! 实例保存上一帧的缩略灰度图，新实例的第一次调用总是返回正常。

use std::time::Instant;

use diagnosis_core::{
    models::{DiagnosisStatus, DiagnosisType},
    SchedulerResult,
};
use image::RgbImage;
use serde_json::json;

use super::{finish, CANNY_HIGH, CANNY_LOW};
use crate::{
    imageops::{canny, downscaled_gray, edge_density, gradient_magnitude, gray_plane, Plane},
    scoring::{clamp_score, ratio},
    traits::ensure_not_empty,
    AlgorithmConfig, AlgorithmOutput, DiagnosisAlgorithm, ThresholdValue,
};

/// 帧间比较使用的缩略图尺寸
const COMPARE_WIDTH: u32 = 160;
const COMPARE_HEIGHT: u32 = 120;
/// 抖动位移搜索半径（缩略图像素）
const MAX_SHIFT: isize = 8;

const FIRST_DETECTION: &str = "首次检测，画面正常";

fn first_detection(started: Instant, threshold: f64) -> AlgorithmOutput {
    finish(
        started,
        DiagnosisStatus::Normal,
        100.0,
        ThresholdValue::Scalar(threshold),
        FIRST_DETECTION.to_string(),
        json!({"first_detection": true}),
    )
}

/// 冻结检测：与上一帧的平均灰度差异过小视为画面冻结
#[derive(Debug, Default)]
pub struct FreezeAlgorithm {
    previous_frame: Option<Plane>,
}

impl FreezeAlgorithm {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosisAlgorithm for FreezeAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Freeze
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let freeze_threshold = config.threshold("freeze_threshold", 0.01);
        let normal_threshold = config.threshold("freeze_normal", 0.05);

        let current = downscaled_gray(image, COMPARE_WIDTH, COMPARE_HEIGHT);
        let Some(previous) = self.previous_frame.replace(current.clone()) else {
            return Ok(first_detection(started, freeze_threshold));
        };

        let diff_ratio = current.abs_diff(&previous).mean() / 255.0;

        let (score, status, message) = if diff_ratio < freeze_threshold {
            let score = clamp_score(ratio(diff_ratio, freeze_threshold) * 60.0);
            (
                score,
                DiagnosisStatus::Warning,
                format!("检测到画面冻结: 帧间差异 {diff_ratio:.4} (评分: {score:.1})"),
            )
        } else if diff_ratio >= normal_threshold {
            let score = clamp_score(
                95.0 + ratio(diff_ratio - normal_threshold, normal_threshold).min(1.0) * 5.0,
            );
            (
                score,
                DiagnosisStatus::Normal,
                format!("画面变化正常: 帧间差异 {diff_ratio:.4} (评分: {score:.1})"),
            )
        } else {
            let score = clamp_score(
                60.0 + ratio(diff_ratio - freeze_threshold, normal_threshold - freeze_threshold)
                    * 35.0,
            );
            (
                score,
                DiagnosisStatus::Normal,
                format!("画面变化较小: 帧间差异 {diff_ratio:.4} (评分: {score:.1})"),
            )
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(freeze_threshold),
            message,
            json!({
                "frame_difference": diff_ratio,
                "raw_score": diff_ratio,
                "normalized_score": score,
            }),
        ))
    }
}

/// 抖动检测：估计相邻两帧之间的整体平移
///
/// 在缩略图上穷举 ±8 像素的偏移，取重叠区域平均差异最小者，
/// 再换算回原图像素。
#[derive(Debug, Default)]
pub struct ShakeAlgorithm {
    previous_frame: Option<Plane>,
}

impl ShakeAlgorithm {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 返回 (dx, dy, 平均差异)
fn estimate_shift(previous: &Plane, current: &Plane) -> (isize, isize, f64) {
    let (w, h) = (current.width as isize, current.height as isize);
    let mut best: (isize, isize, f64) = (0, 0, f64::INFINITY);
    for dy in -MAX_SHIFT..=MAX_SHIFT {
        for dx in -MAX_SHIFT..=MAX_SHIFT {
            let mut sum = 0.0;
            let mut count = 0usize;
            for y in 0.max(-dy)..h.min(h - dy) {
                for x in 0.max(-dx)..w.min(w - dx) {
                    let a = current.data[(y * w + x) as usize];
                    let b = previous.data[((y + dy) * w + (x + dx)) as usize];
                    sum += (a - b).abs();
                    count += 1;
                }
            }
            if count == 0 {
                continue;
            }
            let err = sum / count as f64;
            let tied = (err - best.2).abs() <= 1e-9;
            let closer = err < best.2 - 1e-9
                || (tied && dx.abs() + dy.abs() < best.0.abs() + best.1.abs());
            if closer {
                best = (dx, dy, err);
            }
        }
    }
    best
}

impl DiagnosisAlgorithm for ShakeAlgorithm {
    fn diagnosis_type(&self) -> DiagnosisType {
        DiagnosisType::Shake
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn diagnose(
        &mut self,
        image: &RgbImage,
        config: &AlgorithmConfig,
    ) -> SchedulerResult<AlgorithmOutput> {
        ensure_not_empty(image)?;
        let started = Instant::now();
        let threshold = config.threshold("shake_threshold", 2.0);
        let severe = config.threshold("shake_severe", 6.0);

        let current = downscaled_gray(image, COMPARE_WIDTH, COMPARE_HEIGHT);
        let Some(previous) = self.previous_frame.replace(current.clone()) else {
            return Ok(first_detection(started, threshold));
        };

        let (dx, dy, match_error) = estimate_shift(&previous, &current);
        let scale_x = f64::from(image.width()) / f64::from(COMPARE_WIDTH);
        let scale_y = f64::from(image.height()) / f64::from(COMPARE_HEIGHT);
        let offset_x = dx as f64 * scale_x;
        let offset_y = dy as f64 * scale_y;
        let displacement = (offset_x * offset_x + offset_y * offset_y).sqrt();

        let gray = gray_plane(image);
        let edges = edge_density(&canny(&gray, CANNY_LOW, CANNY_HIGH));
        let gradient_variance = gradient_magnitude(&gray).variance();

        let (score, status, message) = if displacement >= severe {
            let score = clamp_score(40.0 - ratio(displacement - severe, severe) * 40.0);
            (
                score,
                DiagnosisStatus::Warning,
                format!("检测到严重抖动: 位移 {displacement:.1}px (评分: {score:.1})"),
            )
        } else if displacement > threshold {
            let score = clamp_score(60.0 - ratio(displacement - threshold, severe - threshold) * 20.0);
            (
                score,
                DiagnosisStatus::Warning,
                format!("轻微抖动: 位移 {displacement:.1}px (评分: {score:.1})"),
            )
        } else {
            let score =
                clamp_score(100.0 - ratio(displacement, threshold) * 40.0).clamp(60.0, 100.0);
            (
                score,
                DiagnosisStatus::Normal,
                format!("图像稳定: 位移 {displacement:.1}px (评分: {score:.1})"),
            )
        };

        Ok(finish(
            started,
            status,
            score,
            ThresholdValue::Scalar(threshold),
            message,
            json!({
                "displacement": displacement,
                "offset_x": offset_x,
                "offset_y": offset_y,
                "match_error": match_error,
                "edge_density": edges,
                "gradient_variance": gradient_variance,
                "raw_score": displacement,
                "normalized_score": score,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::fixtures::{checkerboard, pseudo_random, solid};

    #[test]
    fn test_first_call_is_always_normal() {
        let config = AlgorithmConfig::default();
        for image in [solid(32, 32, [0, 0, 0]), pseudo_random(32, 32, 3)] {
            let out = FreezeAlgorithm::new().diagnose(&image, &config).unwrap();
            assert_eq!(out.status, DiagnosisStatus::Normal);
            assert_eq!(out.score, 100.0);
            assert_eq!(out.message, FIRST_DETECTION);

            let out = ShakeAlgorithm::new().diagnose(&image, &config).unwrap();
            assert_eq!(out.status, DiagnosisStatus::Normal);
            assert_eq!(out.score, 100.0);
        }
    }

    #[test]
    fn test_identical_frames_are_frozen() {
        let config = AlgorithmConfig::default();
        let mut algo = FreezeAlgorithm::new();
        let frame = pseudo_random(160, 120, 11);
        algo.diagnose(&frame, &config).unwrap();
        let out = algo.diagnose(&frame, &config).unwrap();
        assert_eq!(out.status, DiagnosisStatus::Warning);
        assert_eq!(out.score, 0.0);

        let out = algo.diagnose(&pseudo_random(160, 120, 12), &config).unwrap();
        assert_eq!(out.status, DiagnosisStatus::Normal);
    }

    #[test]
    fn test_static_scene_is_stable() {
        let config = AlgorithmConfig::default();
        let mut algo = ShakeAlgorithm::new();
        let frame = checkerboard(160, 120, 10);
        algo.diagnose(&frame, &config).unwrap();
        let out = algo.diagnose(&frame, &config).unwrap();
        assert_eq!(out.status, DiagnosisStatus::Normal);
        assert_eq!(out.metrics["displacement"].as_f64(), Some(0.0));
    }
}
