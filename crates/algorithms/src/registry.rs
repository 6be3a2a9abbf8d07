//! 诊断类型到算法实现的注册表

use std::collections::HashMap;
use std::sync::Arc;

use diagnosis_core::{models::DiagnosisType, SchedulerError, SchedulerResult};
use tracing::debug;

use crate::{
    algorithms::{
        BlueScreenAlgorithm, BrightnessAlgorithm, ClarityAlgorithm, ColorCastAlgorithm,
        ContrastAlgorithm, FlowerScreenAlgorithm, FocusBlurAlgorithm, FreezeAlgorithm,
        LensDirtyAlgorithm, MosaicAlgorithm, NoiseAlgorithm, OcclusionAlgorithm, ShakeAlgorithm,
        SignalLossAlgorithm,
    },
    DiagnosisAlgorithm,
};

/// 创建算法实例的工厂
pub type AlgorithmFactory = Arc<dyn Fn() -> Box<dyn DiagnosisAlgorithm> + Send + Sync>;

/// 算法注册表
///
/// 每次 `create` 都返回新实例；帧间比较算法的状态由调用方按摄像头保存。
#[derive(Clone)]
pub struct AlgorithmRegistry {
    factories: HashMap<DiagnosisType, AlgorithmFactory>,
}

impl AlgorithmRegistry {
    /// 空注册表
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// 注册全部十四种内置算法
    pub fn standard() -> Self {
        Self::empty()
            .with(DiagnosisType::Brightness, || Box::new(BrightnessAlgorithm))
            .with(DiagnosisType::BlueScreen, || Box::new(BlueScreenAlgorithm))
            .with(DiagnosisType::Clarity, || Box::new(ClarityAlgorithm))
            .with(DiagnosisType::Shake, || Box::new(ShakeAlgorithm::new()))
            .with(DiagnosisType::Freeze, || Box::new(FreezeAlgorithm::new()))
            .with(DiagnosisType::ColorCast, || Box::new(ColorCastAlgorithm))
            .with(DiagnosisType::Occlusion, || Box::new(OcclusionAlgorithm))
            .with(DiagnosisType::Noise, || Box::new(NoiseAlgorithm))
            .with(DiagnosisType::Contrast, || Box::new(ContrastAlgorithm))
            .with(DiagnosisType::Mosaic, || Box::new(MosaicAlgorithm))
            .with(DiagnosisType::FlowerScreen, || Box::new(FlowerScreenAlgorithm))
            .with(DiagnosisType::SignalLoss, || Box::new(SignalLossAlgorithm))
            .with(DiagnosisType::LensDirty, || Box::new(LensDirtyAlgorithm))
            .with(DiagnosisType::FocusBlur, || Box::new(FocusBlurAlgorithm))
    }

    /// 注册或替换某个诊断类型的算法
    pub fn with<F>(mut self, diagnosis_type: DiagnosisType, factory: F) -> Self
    where
        F: Fn() -> Box<dyn DiagnosisAlgorithm> + Send + Sync + 'static,
    {
        self.factories.insert(diagnosis_type, Arc::new(factory));
        self
    }

    pub fn create(&self, diagnosis_type: DiagnosisType) -> SchedulerResult<Box<dyn DiagnosisAlgorithm>> {
        let factory = self
            .factories
            .get(&diagnosis_type)
            .ok_or_else(|| SchedulerError::UnknownDiagnosisType(diagnosis_type.to_string()))?;
        debug!("创建诊断算法: {}", diagnosis_type);
        Ok(factory())
    }

    pub fn supports(&self, diagnosis_type: DiagnosisType) -> bool {
        self.factories.contains_key(&diagnosis_type)
    }

    pub fn supported_types(&self) -> Vec<DiagnosisType> {
        let mut types: Vec<_> = self.factories.keys().copied().collect();
        types.sort();
        types
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl std::fmt::Debug for AlgorithmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlgorithmRegistry")
            .field("types", &self.supported_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{algorithms::fixtures, AlgorithmConfig};

    #[test]
    fn test_standard_registry_covers_every_type() {
        let registry = AlgorithmRegistry::standard();
        for t in DiagnosisType::ALL {
            let algo = registry.create(t).unwrap();
            assert_eq!(algo.diagnosis_type(), t);
        }
        assert_eq!(registry.supported_types().len(), DiagnosisType::ALL.len());
    }

    #[test]
    fn test_missing_type_is_an_error() {
        let registry = AlgorithmRegistry::empty();
        let err = registry.create(DiagnosisType::Mosaic).err().unwrap();
        assert!(matches!(err, SchedulerError::UnknownDiagnosisType(ref s) if s == "mosaic"));
    }

    #[test]
    fn test_scores_are_bounded_for_all_algorithms() {
        let registry = AlgorithmRegistry::standard();
        let config = AlgorithmConfig::default();
        let images = [
            fixtures::solid(40, 30, [0, 0, 0]),
            fixtures::solid(40, 30, [255, 255, 255]),
            fixtures::checkerboard(40, 30, 5),
            fixtures::pseudo_random(40, 30, 5),
        ];
        for t in DiagnosisType::ALL {
            let mut algo = registry.create(t).unwrap();
            for image in &images {
                let out = algo.diagnose(image, &config).unwrap();
                assert!(
                    (0.0..=100.0).contains(&out.score),
                    "{t}: score {} out of range",
                    out.score
                );
                assert!(out.processing_time >= 0.0);
            }
        }
    }

    #[test]
    fn test_only_motion_algorithms_are_stateful() {
        let registry = AlgorithmRegistry::standard();
        let stateful: Vec<_> = DiagnosisType::ALL
            .into_iter()
            .filter(|t| registry.create(*t).unwrap().is_stateful())
            .collect();
        assert_eq!(stateful, vec![DiagnosisType::Shake, DiagnosisType::Freeze]);
    }
}
