//! 十四种诊断算法实现

mod color;
mod exposure;
mod motion;
mod noise;
mod sharpness;
mod signal;

use std::time::Instant;

use diagnosis_core::models::DiagnosisStatus;
use serde_json::Value;

use crate::{scoring::clamp_score, AlgorithmOutput, ThresholdValue};

pub use color::ColorCastAlgorithm;
pub use exposure::{BrightnessAlgorithm, ContrastAlgorithm};
pub use motion::{FreezeAlgorithm, ShakeAlgorithm};
pub use noise::NoiseAlgorithm;
pub use sharpness::{ClarityAlgorithm, FocusBlurAlgorithm, LensDirtyAlgorithm};
pub use signal::{
    BlueScreenAlgorithm, FlowerScreenAlgorithm, MosaicAlgorithm, OcclusionAlgorithm,
    SignalLossAlgorithm,
};

/// Canny 边缘检测的双阈值
pub(crate) const CANNY_LOW: f64 = 50.0;
pub(crate) const CANNY_HIGH: f64 = 150.0;

pub(crate) fn finish(
    started: Instant,
    status: DiagnosisStatus,
    score: f64,
    threshold: ThresholdValue,
    message: String,
    metrics: Value,
) -> AlgorithmOutput {
    AlgorithmOutput {
        status,
        score: clamp_score(score),
        threshold,
        message,
        processing_time: started.elapsed().as_secs_f64() * 1000.0,
        metrics,
    }
}
