//! Caller-defined reduction
//!
//! [`Custom`] wraps a reduce function over raw branch values. Confidence
//! defaults to the mean input confidence and consensus to `1.0`; both can be
//! overridden, and both are range-checked rather than clamped.

use crate::strategy::{
    merged_value, structural_eq, MergeError, MergeProvenance, MergeResult, MergeStrategy,
};
use fm_value::{is_valid_confidence, mean_confidence, TaggedValue};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

type ReduceFn<T, R> = Arc<dyn Fn(&[&T]) -> anyhow::Result<R> + Send + Sync>;
type ScoreFn<T, R> = Arc<dyn Fn(&[TaggedValue<T>], &R) -> f64 + Send + Sync>;
type EqualityFn<T, R> = Arc<dyn Fn(&T, &R) -> bool + Send + Sync>;

/// Strategy backed by a caller-supplied reduce function
///
/// # Example
///
/// ```rust
/// use fm_merge::{merge, Custom};
/// use fm_value::{TaggedValue, TraceId};
///
/// let longest = Custom::new("longest", |values: &[&String]| {
///     Ok(values.iter().max_by_key(|v| v.len()).map(|v| (*v).clone()).unwrap_or_default())
/// });
///
/// let results = vec![
///     TaggedValue::new("short".to_string(), 0.4, "a", TraceId::new()).unwrap(),
///     TaggedValue::new("much longer".to_string(), 0.8, "b", TraceId::new()).unwrap(),
/// ];
/// let merged = merge(&results, &longest).unwrap();
/// assert_eq!(merged.value.value(), "much longer");
/// ```
pub struct Custom<T, R> {
    name: String,
    reduce: ReduceFn<T, R>,
    confidence: Option<ScoreFn<T, R>>,
    consensus: Option<ScoreFn<T, R>>,
    equality: Option<EqualityFn<T, R>>,
}

impl<T, R> Custom<T, R> {
    /// Create custom strategy from a reduce function
    #[must_use]
    pub fn new<F>(name: impl Into<String>, reduce: F) -> Self
    where
        F: Fn(&[&T]) -> anyhow::Result<R> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            reduce: Arc::new(reduce),
            confidence: None,
            consensus: None,
            equality: None,
        }
    }

    /// Override the merged confidence
    #[must_use]
    pub fn with_confidence<F>(mut self, f: F) -> Self
    where
        F: Fn(&[TaggedValue<T>], &R) -> f64 + Send + Sync + 'static,
    {
        self.confidence = Some(Arc::new(f));
        self
    }

    /// Override the consensus level
    #[must_use]
    pub fn with_consensus<F>(mut self, f: F) -> Self
    where
        F: Fn(&[TaggedValue<T>], &R) -> f64 + Send + Sync + 'static,
    {
        self.consensus = Some(Arc::new(f));
        self
    }

    /// Override the agreement notion used by consensus gates
    #[must_use]
    pub fn with_equality<F>(mut self, f: F) -> Self
    where
        F: Fn(&T, &R) -> bool + Send + Sync + 'static,
    {
        self.equality = Some(Arc::new(f));
        self
    }
}

impl<T, R> Clone for Custom<T, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            reduce: Arc::clone(&self.reduce),
            confidence: self.confidence.clone(),
            consensus: self.consensus.clone(),
            equality: self.equality.clone(),
        }
    }
}

impl<T, R> fmt::Debug for Custom<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Custom")
            .field("name", &self.name)
            .field("custom_confidence", &self.confidence.is_some())
            .field("custom_consensus", &self.consensus.is_some())
            .field("custom_equality", &self.equality.is_some())
            .finish_non_exhaustive()
    }
}

impl<T, R> MergeStrategy<T, R> for Custom<T, R>
where
    T: Serialize,
    R: Serialize,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn merge(&self, results: &[TaggedValue<T>]) -> Result<MergeResult<R>, MergeError> {
        let raw: Vec<&T> = results.iter().map(TaggedValue::value).collect();
        let reduced = (self.reduce)(&raw).map_err(|source| MergeError::ReduceFailed {
            strategy: self.name.clone(),
            source,
        })?;

        let confidence = match &self.confidence {
            Some(f) => f(results, &reduced),
            None => mean_confidence(results.iter().map(TaggedValue::confidence)).unwrap_or(0.0),
        };

        let consensus = match &self.consensus {
            Some(f) => f(results, &reduced),
            None => 1.0,
        };
        if !is_valid_confidence(consensus) {
            return Err(MergeError::OutputOutOfRange {
                strategy: self.name.clone(),
                quantity: "consensus level",
                value: consensus,
            });
        }

        Ok(MergeResult {
            value: merged_value(&self.name, reduced, confidence, results)?,
            provenance: MergeProvenance {
                contributing_branches: (0..results.len()).collect(),
                rejected_values: Vec::new(),
                consensus_level: consensus,
            },
            conflicts: Vec::new(),
        })
    }

    fn agrees(&self, branch: &T, merged: &R) -> bool {
        match &self.equality {
            Some(eq) => eq(branch, merged),
            None => structural_eq(branch, merged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge;
    use fm_value::TraceId;

    fn num(value: i64, confidence: f64) -> TaggedValue<i64> {
        TaggedValue::new(value, confidence, "counter", TraceId::new()).unwrap()
    }

    fn sum() -> Custom<i64, i64> {
        Custom::new("sum", |values: &[&i64]| Ok(values.iter().copied().sum()))
    }

    #[test]
    fn defaults() {
        let results = vec![num(1, 0.2), num(2, 0.6)];
        let merged = merge(&results, &sum()).unwrap();
        assert_eq!(*merged.value.value(), 3);
        assert!((merged.value.confidence() - 0.4).abs() < 1e-9);
        assert_eq!(merged.provenance.consensus_level, 1.0);
        assert_eq!(merged.provenance.contributing_branches, vec![0, 1]);
    }

    #[test]
    fn overrides_apply() {
        let strategy = sum()
            .with_confidence(|_, _| 0.9)
            .with_consensus(|results, _| 1.0 / results.len() as f64);
        let merged = merge(&[num(1, 0.2), num(2, 0.6)], &strategy).unwrap();
        assert_eq!(merged.value.confidence(), 0.9);
        assert_eq!(merged.provenance.consensus_level, 0.5);
    }

    #[test]
    fn out_of_range_confidence_fails_loudly() {
        let strategy = sum().with_confidence(|_, _| 1.7);
        let err = merge(&[num(1, 0.2)], &strategy).unwrap_err();
        assert!(matches!(
            err,
            MergeError::OutputOutOfRange { ref strategy, quantity: "confidence", value }
                if strategy == "sum" && value == 1.7
        ));
    }

    #[test]
    fn nan_consensus_fails_loudly() {
        let strategy = sum().with_consensus(|_, _| f64::NAN);
        let err = merge(&[num(1, 0.2)], &strategy).unwrap_err();
        assert!(matches!(
            err,
            MergeError::OutputOutOfRange {
                quantity: "consensus level",
                ..
            }
        ));
    }

    #[test]
    fn reduce_failure_is_wrapped() {
        let strategy: Custom<i64, i64> =
            Custom::new("picky", |_: &[&i64]| Err(anyhow::anyhow!("no majority")));
        let err = merge(&[num(1, 0.2)], &strategy).unwrap_err();
        assert!(matches!(err, MergeError::ReduceFailed { .. }));
        assert!(err.to_string().contains("picky"));
        assert!(err.to_string().contains("no majority"));
    }

    #[test]
    fn equality_override() {
        let strategy = sum().with_equality(|b, m| b.signum() == m.signum());
        assert!(strategy.agrees(&5, &3));
        assert!(!strategy.agrees(&-5, &3));
        assert!(sum().agrees(&3, &3));
    }
}
