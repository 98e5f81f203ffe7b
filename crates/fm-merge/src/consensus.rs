//! Consensus gate
//!
//! [`RequireConsensus`] wraps another strategy and only lets its result
//! through when at least `k` branches agree with the winning value.

use crate::engine::merge;
use crate::strategy::{
    merged_value, values_json, MergeConflict, MergeError, MergeProvenance, MergeResult,
    MergeStrategy, RejectedValue, Resolution,
};
use fm_value::TaggedValue;
use serde::Serialize;
use std::fmt::Debug;

/// What to do when the gate is not satisfied
#[derive(Debug, Clone, PartialEq)]
pub enum OnFailure<R> {
    /// Fail the merge with [`MergeError::ConsensusNotReached`]
    Error,

    /// Return this value with confidence `0.0`
    Fallback(R),
}

/// Gate requiring `k` of `n` branches to agree
///
/// Agreement uses the wrapped strategy's own [`MergeStrategy::agrees`].
/// On success the wrapped result is returned unchanged.
#[derive(Debug, Clone)]
pub struct RequireConsensus<S, R> {
    inner: S,
    min_agreeing: usize,
    on_failure: OnFailure<R>,
}

impl<S, R> RequireConsensus<S, R> {
    /// Strategy name
    pub const NAME: &'static str = "require-consensus";

    /// Require `min_agreeing` branches to agree, failing with an error otherwise
    #[inline]
    #[must_use]
    pub fn new(inner: S, min_agreeing: usize) -> Self {
        Self {
            inner,
            min_agreeing,
            on_failure: OnFailure::Error,
        }
    }

    /// Return `fallback` (confidence `0.0`) instead of failing
    #[inline]
    #[must_use]
    pub fn with_fallback(mut self, fallback: R) -> Self {
        self.on_failure = OnFailure::Fallback(fallback);
        self
    }

    /// Set failure behavior
    #[inline]
    #[must_use]
    pub fn on_failure(mut self, on_failure: OnFailure<R>) -> Self {
        self.on_failure = on_failure;
        self
    }

    /// Required number of agreeing branches
    #[inline]
    #[must_use]
    pub fn min_agreeing(&self) -> usize {
        self.min_agreeing
    }

    /// Wrapped strategy
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<T, R, S> MergeStrategy<T, R> for RequireConsensus<S, R>
where
    S: MergeStrategy<T, R>,
    T: Serialize,
    R: Clone + Debug + Send + Sync,
{
    fn name(&self) -> &str {
        Self::NAME
    }

    fn merge(&self, results: &[TaggedValue<T>]) -> Result<MergeResult<R>, MergeError> {
        let merged = merge(results, &self.inner)?;

        let agreeing = results
            .iter()
            .filter(|r| self.inner.agrees(r.value(), merged.value.value()))
            .count();

        if agreeing >= self.min_agreeing {
            return Ok(merged);
        }

        let gate = format!("{}({})", Self::NAME, self.inner.name());
        tracing::info!(
            strategy = %gate,
            agreeing,
            required = self.min_agreeing,
            total = results.len(),
            "consensus gate failed"
        );

        match &self.on_failure {
            OnFailure::Error => Err(MergeError::ConsensusNotReached {
                strategy: gate,
                agreeing,
                required: self.min_agreeing,
                total: results.len(),
            }),
            OnFailure::Fallback(fallback) => {
                let reason = format!(
                    "consensus gate failed: {agreeing} of {} branches agreed, {} required",
                    results.len(),
                    self.min_agreeing
                );
                let values = values_json(&gate, results)?;
                let rejected = values
                    .iter()
                    .enumerate()
                    .map(|(branch, value)| RejectedValue::new(branch, value.clone(), reason.clone()))
                    .collect();

                let mut conflicts = merged.conflicts;
                conflicts.push(MergeConflict::whole(values, Resolution::Rejected));

                Ok(MergeResult {
                    value: merged_value(&gate, fallback.clone(), 0.0, results)?,
                    provenance: MergeProvenance {
                        contributing_branches: Vec::new(),
                        rejected_values: rejected,
                        consensus_level: merged.provenance.consensus_level,
                    },
                    conflicts,
                })
            }
        }
    }

    fn agrees(&self, branch: &T, merged: &R) -> bool {
        self.inner.agrees(branch, merged)
    }
}
