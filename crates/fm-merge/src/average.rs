//! Weighted average strategy
//!
//! Continuous merge: `Σ(value·confidence) / Σ(confidence)`, with optional
//! standard-deviation outlier rejection before averaging.

use crate::strategy::{
    merged_value, to_json, MergeConflict, MergeError, MergeProvenance, MergeResult, MergeStrategy,
    RejectedValue, Resolution,
};
use fm_value::{mean_confidence, TaggedValue};
use serde::Serialize;

/// Values usable by [`WeightedAverage`]
pub trait AsNumber {
    /// Numeric view of the value, `None` if it has none
    fn as_number(&self) -> Option<f64>;
}

impl AsNumber for f64 {
    fn as_number(&self) -> Option<f64> {
        Some(*self)
    }
}

impl AsNumber for f32 {
    fn as_number(&self) -> Option<f64> {
        Some(f64::from(*self))
    }
}

impl AsNumber for i32 {
    fn as_number(&self) -> Option<f64> {
        Some(f64::from(*self))
    }
}

impl AsNumber for u32 {
    fn as_number(&self) -> Option<f64> {
        Some(f64::from(*self))
    }
}

#[allow(clippy::cast_precision_loss)]
impl AsNumber for i64 {
    fn as_number(&self) -> Option<f64> {
        Some(*self as f64)
    }
}

#[allow(clippy::cast_precision_loss)]
impl AsNumber for u64 {
    fn as_number(&self) -> Option<f64> {
        Some(*self as f64)
    }
}

impl AsNumber for serde_json::Value {
    fn as_number(&self) -> Option<f64> {
        self.as_f64()
    }
}

/// Default tolerance for treating a branch value as equal to the average
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

/// Weighted average over numeric values
///
/// # Characteristics
/// - Outlier rejection (optional): values more than `k` population standard
///   deviations from the unweighted mean are excluded and logged
/// - Rejection never removes every branch; if it would, nothing is rejected
/// - Zero total confidence falls back to the unweighted mean
/// - Merged confidence = mean confidence of the retained branches
/// - `consensus_level` = `1 / (1 + cv)` over retained values, where `cv` is the
///   coefficient of variation
#[derive(Debug, Clone, Copy)]
pub struct WeightedAverage {
    outlier_threshold: Option<f64>,
    tolerance: f64,
}

impl Default for WeightedAverage {
    fn default() -> Self {
        Self {
            outlier_threshold: None,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl WeightedAverage {
    /// Strategy name
    pub const NAME: &'static str = "weighted-average";

    /// Create new weighted average without outlier rejection
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject values more than `k` standard deviations from the mean
    #[inline]
    #[must_use]
    pub fn with_outlier_threshold(mut self, k: f64) -> Self {
        self.outlier_threshold = Some(k);
        self
    }

    /// Absolute tolerance used by [`MergeStrategy::agrees`]
    #[inline]
    #[must_use]
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Configured outlier threshold
    #[inline]
    #[must_use]
    pub fn outlier_threshold(&self) -> Option<f64> {
        self.outlier_threshold
    }

    fn numbers<T: AsNumber>(results: &[TaggedValue<T>]) -> Result<Vec<f64>, MergeError> {
        results
            .iter()
            .enumerate()
            .map(|(branch, r)| match r.value().as_number() {
                Some(n) if n.is_finite() => Ok(n),
                _ => Err(MergeError::InvalidInput {
                    strategy: Self::NAME.to_string(),
                    branch,
                    reason: "value is not a finite number".to_string(),
                }),
            })
            .collect()
    }

    /// Indices of outliers with their z-scores
    fn outliers(&self, values: &[f64]) -> Result<Vec<(usize, f64)>, MergeError> {
        let Some(k) = self.outlier_threshold else {
            return Ok(Vec::new());
        };
        if !(k.is_finite() && k > 0.0) {
            return Err(MergeError::InvalidConfig {
                strategy: Self::NAME.to_string(),
                reason: format!("outlier threshold must be a positive number, got {k}"),
            });
        }

        let (mean, std) = mean_std(values.iter().copied());
        if std <= 0.0 {
            return Ok(Vec::new());
        }

        let outliers: Vec<(usize, f64)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (i, (v - mean).abs() / std))
            .filter(|(_, z)| *z > k)
            .collect();

        if outliers.len() == values.len() {
            tracing::debug!(threshold = k, "outlier rejection would drop every branch; keeping all");
            return Ok(Vec::new());
        }

        Ok(outliers)
    }
}

/// Unweighted mean and population standard deviation
#[allow(clippy::cast_precision_loss)]
fn mean_std<I>(values: I) -> (f64, f64)
where
    I: IntoIterator<Item = f64> + Clone,
{
    let (sum, count) = values
        .clone()
        .into_iter()
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / count as f64;
    let variance = values
        .into_iter()
        .map(|v| (v - mean).powi(2))
        .sum::<f64>()
        / count as f64;
    (mean, variance.sqrt())
}

/// Agreement measure from the coefficient of variation
fn consensus_from_spread(mean: f64, std: f64) -> f64 {
    if std <= 0.0 {
        return 1.0;
    }
    if mean == 0.0 {
        return 0.0;
    }
    let cv = std / mean.abs();
    (1.0 / (1.0 + cv)).clamp(0.0, 1.0)
}

impl<T> MergeStrategy<T, f64> for WeightedAverage
where
    T: AsNumber + Serialize,
{
    fn name(&self) -> &str {
        Self::NAME
    }

    #[allow(clippy::cast_precision_loss)]
    fn merge(&self, results: &[TaggedValue<T>]) -> Result<MergeResult<f64>, MergeError> {
        let values = Self::numbers(results)?;
        let outliers = self.outliers(&values)?;

        let kept: Vec<usize> = (0..values.len())
            .filter(|i| !outliers.iter().any(|(o, _)| o == i))
            .collect();

        let weight_sum: f64 = kept.iter().map(|&i| results[i].confidence()).sum();
        let average = if weight_sum > 0.0 {
            kept.iter()
                .map(|&i| values[i] * results[i].confidence())
                .sum::<f64>()
                / weight_sum
        } else {
            kept.iter().map(|&i| values[i]).sum::<f64>() / kept.len() as f64
        };

        let (kept_mean, kept_std) = mean_std(kept.iter().map(|&i| values[i]));
        let consensus = consensus_from_spread(kept_mean, kept_std);
        let confidence = mean_confidence(kept.iter().map(|&i| results[i].confidence())).unwrap_or(0.0);

        let mut rejected = Vec::with_capacity(outliers.len());
        for &(branch, z) in &outliers {
            rejected.push(RejectedValue::new(
                branch,
                to_json(Self::NAME, results[branch].value())?,
                format!("outlier detected ({z:.2} std deviations)"),
            ));
        }

        let mut conflicts = Vec::new();
        if kept_std > 0.0 {
            let values = kept
                .iter()
                .map(|&i| to_json(Self::NAME, results[i].value()))
                .collect::<Result<Vec<_>, _>>()?;
            conflicts.push(MergeConflict::whole(values, Resolution::Averaged));
        }
        if !rejected.is_empty() {
            conflicts.push(MergeConflict::whole(
                rejected.iter().map(|r| r.value.clone()).collect(),
                Resolution::Rejected,
            ));
        }

        Ok(MergeResult {
            value: merged_value(Self::NAME, average, confidence, results)?,
            provenance: MergeProvenance {
                contributing_branches: kept,
                rejected_values: rejected,
                consensus_level: consensus,
            },
            conflicts,
        })
    }

    fn agrees(&self, branch: &T, merged: &f64) -> bool {
        branch
            .as_number()
            .is_some_and(|v| (v - merged).abs() <= self.tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge;
    use fm_value::TraceId;

    fn sample(value: f64, confidence: f64) -> TaggedValue<f64> {
        TaggedValue::new(value, confidence, "estimator", TraceId::new()).unwrap()
    }

    #[test]
    fn weighted_mean() {
        let results = vec![sample(10.0, 0.9), sample(20.0, 0.8), sample(30.0, 0.7)];
        let merged = merge(&results, &WeightedAverage::new()).unwrap();

        let expected = (10.0 * 0.9 + 20.0 * 0.8 + 30.0 * 0.7) / (0.9 + 0.8 + 0.7);
        assert!((merged.value.value() - expected).abs() < 1e-9);
        assert!((merged.value.value() - 46.0 / 2.4).abs() < 1e-9);
        assert!((merged.value.confidence() - 0.8).abs() < 1e-9);
        assert_eq!(merged.provenance.contributing_branches, vec![0, 1, 2]);
        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.conflicts[0].resolution, Resolution::Averaged);
    }

    #[test]
    fn identical_values_are_unanimous() {
        let results = vec![sample(4.0, 0.5), sample(4.0, 0.9)];
        let merged = merge(&results, &WeightedAverage::new()).unwrap();
        assert!((merged.value.value() - 4.0).abs() < 1e-9);
        assert_eq!(merged.provenance.consensus_level, 1.0);
        assert!(merged.is_unanimous());
    }

    #[test]
    fn outlier_rejected_and_logged() {
        let results = vec![
            sample(10.0, 0.8),
            sample(11.0, 0.8),
            sample(10.5, 0.8),
            sample(9.5, 0.8),
            sample(10.2, 0.8),
            sample(100.0, 0.8),
        ];
        let strategy = WeightedAverage::new().with_outlier_threshold(2.0);
        let merged = merge(&results, &strategy).unwrap();

        assert_eq!(merged.provenance.rejected_values.len(), 1);
        let rejected = &merged.provenance.rejected_values[0];
        assert_eq!(rejected.branch, 5);
        assert!(rejected.reason.starts_with("outlier detected ("));
        assert!(rejected.reason.ends_with("std deviations)"));
        assert!(*merged.value.value() < 12.0);
        assert!(!merged.provenance.contributing_branches.contains(&5));
        assert!(merged
            .conflicts
            .iter()
            .any(|c| c.resolution == Resolution::Rejected));
    }

    #[test]
    fn rejection_never_drops_everything() {
        let results = vec![sample(0.0, 0.5), sample(10.0, 0.5)];
        let strategy = WeightedAverage::new().with_outlier_threshold(0.5);
        let merged = merge(&results, &strategy).unwrap();
        assert!(merged.provenance.rejected_values.is_empty());
        assert_eq!(*merged.value.value(), 5.0);
    }

    #[test]
    fn invalid_threshold_is_config_error() {
        let results = vec![sample(1.0, 0.5), sample(2.0, 0.5)];
        let err = merge(&results, &WeightedAverage::new().with_outlier_threshold(-1.0)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn zero_weights_fall_back_to_plain_mean() {
        let results = vec![sample(2.0, 0.0), sample(4.0, 0.0)];
        let merged = merge(&results, &WeightedAverage::new()).unwrap();
        assert_eq!(*merged.value.value(), 3.0);
        assert_eq!(merged.value.confidence(), 0.0);
    }

    #[test]
    fn non_numeric_json_rejected() {
        let results = vec![
            TaggedValue::new(serde_json::json!(1.0), 0.5, "a", TraceId::new()).unwrap(),
            TaggedValue::new(serde_json::json!("two"), 0.5, "b", TraceId::new()).unwrap(),
        ];
        let err = merge(&results, &WeightedAverage::new()).unwrap_err();
        assert_eq!(err.branch(), Some(1));
    }

    #[test]
    fn non_finite_rejected() {
        let results = vec![sample(1.0, 0.5), sample(f64::INFINITY, 0.5)];
        let err = merge(&results, &WeightedAverage::new()).unwrap_err();
        assert!(matches!(err, MergeError::InvalidInput { branch: 1, .. }));
    }

    #[test]
    fn consensus_decreases_with_spread() {
        let tight = vec![sample(10.0, 0.5), sample(10.5, 0.5)];
        let wide = vec![sample(1.0, 0.5), sample(19.0, 0.5)];
        let tight = merge(&tight, &WeightedAverage::new()).unwrap();
        let wide = merge(&wide, &WeightedAverage::new()).unwrap();
        assert!(tight.provenance.consensus_level > wide.provenance.consensus_level);
    }

    #[test]
    fn agreement_uses_tolerance() {
        let strategy = WeightedAverage::new().with_tolerance(0.5);
        assert!(MergeStrategy::<f64, f64>::agrees(&strategy, &10.2, &10.0));
        assert!(!MergeStrategy::<f64, f64>::agrees(&strategy, &11.0, &10.0));
    }
}
