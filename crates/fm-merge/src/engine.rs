//! Merge dispatch
//!
//! [`merge`] is the single typed entry point. It performs no aggregation of its
//! own; it guards the strategy call with the input and output contracts.

use crate::strategy::{MergeError, MergeResult, MergeStrategy};
use fm_value::{is_valid_confidence, TaggedValue, MERGED_ORIGIN};

/// Stateless merge engine
///
/// Holds no state between calls; every merge is independent.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine;

impl MergeEngine {
    /// Create new engine
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Merge results with the given strategy
    ///
    /// # Errors
    /// See [`merge`]
    #[inline]
    pub fn merge<T, R, S>(
        &self,
        results: &[TaggedValue<T>],
        strategy: &S,
    ) -> Result<MergeResult<R>, MergeError>
    where
        S: MergeStrategy<T, R> + ?Sized,
    {
        merge(results, strategy)
    }
}

/// Merge branch results with a strategy
///
/// # Preconditions checked
/// - `results` is non-empty
/// - every input confidence is finite and within `[0, 1]`
///
/// # Postconditions checked
/// - output confidence and consensus level within `[0, 1]`
/// - output origin is the merged marker
///
/// # Errors
/// - [`MergeError::EmptyInput`] for an empty result set
/// - [`MergeError::InvalidConfidence`] for a malformed input, before aggregation
/// - [`MergeError::OutputOutOfRange`] / [`MergeError::ForeignOrigin`] for a
///   strategy that broke its contract
/// - whatever the strategy itself raises
pub fn merge<T, R, S>(
    results: &[TaggedValue<T>],
    strategy: &S,
) -> Result<MergeResult<R>, MergeError>
where
    S: MergeStrategy<T, R> + ?Sized,
{
    let name = strategy.name();

    if results.is_empty() {
        return Err(MergeError::EmptyInput {
            strategy: name.to_string(),
        });
    }

    validate_inputs(name, results)?;

    let result = strategy.merge(results)?;

    validate_output(name, &result)?;

    tracing::debug!(
        strategy = name,
        branches = results.len(),
        contributing = result.provenance.contributing_branches.len(),
        rejected = result.provenance.rejected_values.len(),
        conflicts = result.conflicts.len(),
        consensus = result.provenance.consensus_level,
        "merge completed"
    );

    Ok(result)
}

/// Reject malformed confidences before any aggregation happens
fn validate_inputs<T>(strategy: &str, results: &[TaggedValue<T>]) -> Result<(), MergeError> {
    for (branch, result) in results.iter().enumerate() {
        if !is_valid_confidence(result.confidence()) {
            return Err(MergeError::InvalidConfidence {
                strategy: strategy.to_string(),
                branch,
                value: result.confidence(),
            });
        }
    }
    Ok(())
}

fn validate_output<R>(strategy: &str, result: &MergeResult<R>) -> Result<(), MergeError> {
    let confidence = result.value.confidence();
    if !is_valid_confidence(confidence) {
        return Err(MergeError::OutputOutOfRange {
            strategy: strategy.to_string(),
            quantity: "confidence",
            value: confidence,
        });
    }

    let consensus = result.provenance.consensus_level;
    if !is_valid_confidence(consensus) {
        return Err(MergeError::OutputOutOfRange {
            strategy: strategy.to_string(),
            quantity: "consensus level",
            value: consensus,
        });
    }

    if result.value.origin() != MERGED_ORIGIN {
        return Err(MergeError::ForeignOrigin {
            strategy: strategy.to_string(),
            origin: result.value.origin().to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::MergeProvenance;
    use fm_value::TraceId;

    /// Returns whatever it was configured with, ignoring the input
    #[derive(Debug)]
    struct Fixed {
        confidence: f64,
        consensus: f64,
        origin: &'static str,
    }

    impl MergeStrategy<u32, u32> for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn merge(&self, _results: &[TaggedValue<u32>]) -> Result<MergeResult<u32>, MergeError> {
            Ok(MergeResult {
                value: TaggedValue::new_unchecked(7, self.confidence, self.origin, TraceId::from("t")),
                provenance: MergeProvenance {
                    consensus_level: self.consensus,
                    ..MergeProvenance::default()
                },
                conflicts: vec![],
            })
        }

        fn agrees(&self, branch: &u32, merged: &u32) -> bool {
            branch == merged
        }
    }

    fn ok_strategy() -> Fixed {
        Fixed {
            confidence: 0.5,
            consensus: 1.0,
            origin: MERGED_ORIGIN,
        }
    }

    fn input(confidence: f64) -> TaggedValue<u32> {
        TaggedValue::new_unchecked(1, confidence, "branch", TraceId::new())
    }

    #[test]
    fn empty_input_rejected() {
        let empty: Vec<TaggedValue<u32>> = Vec::new();
        let err = merge(&empty, &ok_strategy()).unwrap_err();
        assert!(matches!(err, MergeError::EmptyInput { ref strategy } if strategy == "fixed"));
    }

    #[test]
    fn malformed_input_rejected_before_strategy() {
        let err = merge(&[input(0.5), input(f64::NAN)], &ok_strategy()).unwrap_err();
        assert!(matches!(err, MergeError::InvalidConfidence { branch: 1, .. }));

        let err = merge(&[input(1.5)], &ok_strategy()).unwrap_err();
        assert!(matches!(err, MergeError::InvalidConfidence { branch: 0, .. }));
    }

    #[test]
    fn out_of_range_output_fails_loudly() {
        let strategy = Fixed {
            confidence: 1.2,
            ..ok_strategy()
        };
        let err = merge(&[input(0.5)], &strategy).unwrap_err();
        assert!(matches!(
            err,
            MergeError::OutputOutOfRange {
                quantity: "confidence",
                ..
            }
        ));

        let strategy = Fixed {
            consensus: -0.1,
            ..ok_strategy()
        };
        let err = merge(&[input(0.5)], &strategy).unwrap_err();
        assert!(matches!(
            err,
            MergeError::OutputOutOfRange {
                quantity: "consensus level",
                ..
            }
        ));
    }

    #[test]
    fn foreign_origin_rejected() {
        let strategy = Fixed {
            origin: "branch-0",
            ..ok_strategy()
        };
        let err = merge(&[input(0.5)], &strategy).unwrap_err();
        assert!(matches!(err, MergeError::ForeignOrigin { .. }));
    }

    #[test]
    fn engine_delegates() {
        let result = MergeEngine::new().merge(&[input(0.5)], &ok_strategy()).unwrap();
        assert_eq!(*result.value.value(), 7);
    }
}
