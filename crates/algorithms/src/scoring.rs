//! 评分分段函数
//!
//! 各算法把原始度量映射到 0..=100 的评分，非有限值按 0 处理。

/// 把评分限制在 0..=100
pub fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// 分母为0时返回0
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < f64::EPSILON {
        0.0
    } else {
        numerator / denominator
    }
}

/// 度量值落入的区段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    /// 低于下限 / 超过上限
    Poor,
    /// 在可接受范围内
    Acceptable,
    /// 达到优秀
    Excellent,
}

/// 越大越好的度量（清晰度、对比度等）
///
/// - 低于 `min`: `value / min * 60`
/// - 达到 `excellent`: `95 + (value - excellent) / excellent * 5`，上限 100
/// - 之间: `60 + (value - min) / (excellent - min) * 35`，限制在 60..=95
pub fn higher_is_better(value: f64, min: f64, excellent: f64) -> (f64, Band) {
    if value < min {
        (clamp_score(ratio(value, min) * 60.0), Band::Poor)
    } else if value >= excellent {
        (
            clamp_score((95.0 + ratio(value - excellent, excellent) * 5.0).min(100.0)),
            Band::Excellent,
        )
    } else {
        (
            clamp_score(60.0 + ratio(value - min, excellent - min) * 35.0).clamp(60.0, 95.0),
            Band::Acceptable,
        )
    }
}

/// 越小越好的度量（噪声）
///
/// - 不超过 `excellent`: `100 - value / excellent * 5`
/// - 不超过 `max`: `95 - (value - excellent) / (max - excellent) * 35`，限制在 60..=95
/// - 超过 `max`: `60 - (value - max) / (ceiling - max) * 60`
pub fn lower_is_better(value: f64, excellent: f64, max: f64, ceiling: f64) -> (f64, Band) {
    if value <= excellent {
        (clamp_score(100.0 - ratio(value, excellent) * 5.0), Band::Excellent)
    } else if value <= max {
        (
            clamp_score(95.0 - ratio(value - excellent, max - excellent) * 35.0).clamp(60.0, 95.0),
            Band::Acceptable,
        )
    } else {
        (
            clamp_score(60.0 - ratio(value - max, ceiling - max) * 60.0),
            Band::Poor,
        )
    }
}

/// 三级异常程度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Moderate,
    Severe,
}

/// 异常分值越大越严重的三级分段
///
/// - 达到 `severe`: `40 - (value - severe) / (1 - severe) * 40`
/// - 达到 `threshold`: `60 - (value - threshold) / (severe - threshold) * 20`
/// - 否则: `100 - value / threshold * 40`，限制在 60..=100
pub fn severity_bands(value: f64, threshold: f64, severe: f64) -> (f64, Severity) {
    if value >= severe {
        (
            clamp_score(40.0 - ratio(value - severe, 1.0 - severe) * 40.0),
            Severity::Severe,
        )
    } else if value >= threshold {
        (
            clamp_score(60.0 - ratio(value - threshold, severe - threshold) * 20.0),
            Severity::Moderate,
        )
    } else {
        (
            clamp_score(100.0 - ratio(value, threshold) * 40.0).clamp(60.0, 100.0),
            Severity::Normal,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_higher_is_better_bands() {
        assert_eq!(higher_is_better(50.0, 100.0, 500.0), (30.0, Band::Poor));
        assert_eq!(higher_is_better(300.0, 100.0, 500.0), (77.5, Band::Acceptable));
        assert_eq!(higher_is_better(500.0, 100.0, 500.0), (95.0, Band::Excellent));
        assert_eq!(higher_is_better(1e9, 100.0, 500.0).0, 100.0);
    }

    #[test]
    fn test_lower_is_better_bands() {
        assert_eq!(lower_is_better(0.0, 3.0, 15.0, 50.0), (100.0, Band::Excellent));
        assert_eq!(lower_is_better(15.0, 3.0, 15.0, 50.0), (60.0, Band::Acceptable));
        assert_eq!(lower_is_better(50.0, 3.0, 15.0, 50.0), (0.0, Band::Poor));
        assert_eq!(lower_is_better(500.0, 3.0, 15.0, 50.0).0, 0.0);
    }

    #[test]
    fn test_severity_bands() {
        assert_eq!(severity_bands(0.0, 0.3, 0.6), (100.0, Severity::Normal));
        assert_eq!(severity_bands(0.3, 0.3, 0.6), (60.0, Severity::Moderate));
        assert_eq!(severity_bands(0.6, 0.3, 0.6), (40.0, Severity::Severe));
        assert_eq!(severity_bands(1.0, 0.3, 0.6), (0.0, Severity::Severe));
    }

    #[test]
    fn test_degenerate_thresholds_stay_in_range() {
        for (v, t, s) in [(0.5, 0.0, 0.0), (1.0, 1.0, 1.0), (f64::NAN, 0.3, 0.6)] {
            let (score, _) = severity_bands(v, t, s);
            assert!((0.0..=100.0).contains(&score));
        }
        let (score, _) = higher_is_better(10.0, 0.0, 0.0);
        assert!((0.0..=100.0).contains(&score));
    }
}
