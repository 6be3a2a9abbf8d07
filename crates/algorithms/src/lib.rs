//! 视频画面质量诊断算法
//!
//! 每种诊断类型对应一个 [`DiagnosisAlgorithm`] 实现，输入一帧RGB图像和
//! 合并后的算法配置，输出状态、0..=100 的评分和度量值。
//! 算法通过 [`AlgorithmRegistry`] 按诊断类型获取。

pub mod algorithms;
pub mod imageops;
pub mod registry;
pub mod scoring;
pub mod thresholds;
mod traits;

pub use registry::{AlgorithmFactory, AlgorithmRegistry};
pub use thresholds::merge_thresholds;
pub use traits::{AlgorithmConfig, AlgorithmOutput, DiagnosisAlgorithm, ThresholdValue};
