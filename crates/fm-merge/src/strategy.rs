//! Merge strategy trait and core types
//!
//! Provides the [`MergeStrategy`] trait for pluggable aggregation of branch
//! results, plus the result, provenance and conflict records every strategy
//! produces.

use fm_value::{TaggedValue, TraceId, ValueError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Merge strategy reducing N branch results into one
///
/// # Contract
/// - `merge()` is a pure function of its input: same results, same output
/// - the returned value carries [`fm_value::MERGED_ORIGIN`] as its origin
/// - confidence and consensus level stay within `[0, 1]`
///
/// Strategies are normally invoked through [`crate::merge`], which checks the
/// input and output contracts around the call.
pub trait MergeStrategy<T, R>: Send + Sync + fmt::Debug {
    /// Strategy name (for diagnostics)
    fn name(&self) -> &str;

    /// Reduce branch results into one merged result
    ///
    /// # Errors
    /// Strategy-specific [`MergeError`] variants
    fn merge(&self, results: &[TaggedValue<T>]) -> Result<MergeResult<R>, MergeError>;

    /// Whether a branch value agrees with the merged value
    ///
    /// This is the strategy's own equality notion, used by consensus gates.
    fn agrees(&self, branch: &T, merged: &R) -> bool;
}

impl<T, R, S> MergeStrategy<T, R> for Box<S>
where
    S: MergeStrategy<T, R> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn merge(&self, results: &[TaggedValue<T>]) -> Result<MergeResult<R>, MergeError> {
        (**self).merge(results)
    }

    fn agrees(&self, branch: &T, merged: &R) -> bool {
        (**self).agrees(branch, merged)
    }
}

impl<T, R, S> MergeStrategy<T, R> for Arc<S>
where
    S: MergeStrategy<T, R> + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn merge(&self, results: &[TaggedValue<T>]) -> Result<MergeResult<R>, MergeError> {
        (**self).merge(results)
    }

    fn agrees(&self, branch: &T, merged: &R) -> bool {
        (**self).agrees(branch, merged)
    }
}

/// Boxed strategy over JSON values
pub type DynStrategy = Box<dyn MergeStrategy<Value, Value>>;

/// Merged value plus its audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeResult<R> {
    /// The merged value, origin fixed to the merged marker
    pub value: TaggedValue<R>,

    /// Which branches contributed or were rejected
    pub provenance: MergeProvenance,

    /// Disagreements encountered; empty means perfect agreement
    pub conflicts: Vec<MergeConflict>,
}

impl<R> MergeResult<R> {
    /// Check whether all branches agreed
    #[inline]
    #[must_use]
    pub fn is_unanimous(&self) -> bool {
        self.conflicts.is_empty()
    }
}

/// Provenance of a merged value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergeProvenance {
    /// Branch indices that fed the final value
    pub contributing_branches: Vec<usize>,

    /// Branch values excluded from the final value, and why
    pub rejected_values: Vec<RejectedValue>,

    /// Agreement measure in `[0, 1]`; meaning is strategy-defined
    pub consensus_level: f64,
}

/// A branch value excluded from the merged result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedValue {
    /// Branch index
    pub branch: usize,

    /// The rejected value
    pub value: Value,

    /// Human-readable reason
    pub reason: String,
}

impl RejectedValue {
    /// Create new rejection record
    #[inline]
    #[must_use]
    pub fn new(branch: usize, value: Value, reason: impl Into<String>) -> Self {
        Self {
            branch,
            value,
            reason: reason.into(),
        }
    }
}

/// A disagreement between branches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// Field path; `None` means the whole value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Disagreeing values, in branch order
    pub values: Vec<Value>,

    /// How the disagreement was settled
    pub resolution: Resolution,
}

impl MergeConflict {
    /// Conflict on the whole value
    #[inline]
    #[must_use]
    pub fn whole(values: Vec<Value>, resolution: Resolution) -> Self {
        Self {
            field: None,
            values,
            resolution,
        }
    }

    /// Prefix the field path with a parent field name
    #[must_use]
    pub fn nested_under(mut self, parent: &str) -> Self {
        self.field = Some(match self.field {
            Some(inner) => format!("{parent}.{inner}"),
            None => parent.to_string(),
        });
        self
    }
}

/// Conflict resolution kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Settled by weighted vote
    Voted,

    /// Settled by averaging
    Averaged,

    /// First branch value kept
    First,

    /// Values excluded from the result
    Rejected,
}

/// Merge error with diagnostics
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// No results to merge
    #[error("[{strategy}] cannot merge an empty result set")]
    EmptyInput {
        /// Active strategy
        strategy: String,
    },

    /// An input confidence is `NaN` or outside `[0, 1]`
    #[error("[{strategy}] branch {branch} has malformed confidence {value}")]
    InvalidConfidence {
        /// Active strategy
        strategy: String,
        /// Offending branch index
        branch: usize,
        /// Offending value
        value: f64,
    },

    /// A branch value cannot be handled by the strategy
    #[error("[{strategy}] branch {branch} rejected: {reason}")]
    InvalidInput {
        /// Active strategy
        strategy: String,
        /// Offending branch index
        branch: usize,
        /// What was wrong
        reason: String,
    },

    /// Strategy computed a confidence or consensus level outside `[0, 1]`
    #[error("[{strategy}] computed {quantity} {value} outside [0.0, 1.0]")]
    OutputOutOfRange {
        /// Active strategy
        strategy: String,
        /// `"confidence"` or `"consensus level"`
        quantity: &'static str,
        /// Offending value
        value: f64,
    },

    /// Strategy returned a value not marked as merged
    #[error("[{strategy}] produced origin '{origin}' instead of the merged marker")]
    ForeignOrigin {
        /// Active strategy
        strategy: String,
        /// Origin found on the output
        origin: String,
    },

    /// Caller-supplied reduce function failed
    #[error("[{strategy}] reduce function failed: {source}")]
    ReduceFailed {
        /// Active strategy
        strategy: String,
        /// Underlying failure
        #[source]
        source: anyhow::Error,
    },

    /// Consensus gate not satisfied
    #[error("[{strategy}] consensus not reached: {agreeing} of {total} branches agree, {required} required")]
    ConsensusNotReached {
        /// Active strategy
        strategy: String,
        /// Branches agreeing with the winning value
        agreeing: usize,
        /// Branches required to agree
        required: usize,
        /// Total branches
        total: usize,
    },

    /// A field-level merge failed
    #[error("[{strategy}] field '{field}' failed: {source}")]
    FieldFailed {
        /// Active strategy
        strategy: String,
        /// Field being merged
        field: String,
        /// Underlying failure
        #[source]
        source: Box<MergeError>,
    },

    /// No strategy registered under this name
    #[error("unknown merge strategy: {name}")]
    UnknownStrategy {
        /// Requested name
        name: String,
    },

    /// Strategy misconfigured
    #[error("[{strategy}] invalid configuration: {reason}")]
    InvalidConfig {
        /// Active strategy
        strategy: String,
        /// What was wrong
        reason: String,
    },

    /// A value could not be recorded as JSON
    #[error("[{strategy}] failed to record value: {source}")]
    Serialization {
        /// Active strategy
        strategy: String,
        /// Underlying failure
        #[source]
        source: serde_json::Error,
    },
}

impl MergeError {
    /// Name of the strategy that was active, if any
    #[must_use]
    pub fn strategy(&self) -> Option<&str> {
        match self {
            Self::EmptyInput { strategy }
            | Self::InvalidConfidence { strategy, .. }
            | Self::InvalidInput { strategy, .. }
            | Self::OutputOutOfRange { strategy, .. }
            | Self::ForeignOrigin { strategy, .. }
            | Self::ReduceFailed { strategy, .. }
            | Self::ConsensusNotReached { strategy, .. }
            | Self::FieldFailed { strategy, .. }
            | Self::InvalidConfig { strategy, .. }
            | Self::Serialization { strategy, .. } => Some(strategy),
            Self::UnknownStrategy { .. } => None,
        }
    }

    /// Branch index the error refers to, if any
    #[must_use]
    pub fn branch(&self) -> Option<usize> {
        match self {
            Self::InvalidConfidence { branch, .. } | Self::InvalidInput { branch, .. } => {
                Some(*branch)
            }
            Self::FieldFailed { source, .. } => source.branch(),
            _ => None,
        }
    }

    /// Configuration errors: caller mistakes, never worth retrying
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptyInput { .. } | Self::UnknownStrategy { .. } | Self::InvalidConfig { .. }
        )
    }

    /// Translate branch indices through a sub-slice index map
    #[must_use]
    pub(crate) fn remap_branch(self, index_map: &[usize]) -> Self {
        let remap = |b: usize| index_map.get(b).copied().unwrap_or(b);
        match self {
            Self::InvalidConfidence {
                strategy,
                branch,
                value,
            } => Self::InvalidConfidence {
                strategy,
                branch: remap(branch),
                value,
            },
            Self::InvalidInput {
                strategy,
                branch,
                reason,
            } => Self::InvalidInput {
                strategy,
                branch: remap(branch),
                reason,
            },
            other => other,
        }
    }
}

/// Record a value as JSON for provenance and conflict logs
pub(crate) fn to_json<T: Serialize + ?Sized>(strategy: &str, value: &T) -> Result<Value, MergeError> {
    serde_json::to_value(value).map_err(|source| MergeError::Serialization {
        strategy: strategy.to_string(),
        source,
    })
}

/// Grouping key for a value: its JSON text with object keys sorted
pub(crate) fn value_key<T: Serialize + ?Sized>(strategy: &str, value: &T) -> Result<String, MergeError> {
    Ok(sorted_keys(to_json(strategy, value)?).to_string())
}

fn sorted_keys(value: Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut entries: Vec<(String, Value)> = object.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted_keys).collect()),
        other => other,
    }
}

/// Record every branch value as JSON, in branch order
pub(crate) fn values_json<T: Serialize>(
    strategy: &str,
    results: &[TaggedValue<T>],
) -> Result<Vec<Value>, MergeError> {
    results.iter().map(|r| to_json(strategy, r.value())).collect()
}

/// Structural equality through the JSON data model
///
/// Values that fail to serialize are never equal.
#[must_use]
pub fn structural_eq<A, B>(a: &A, b: &B) -> bool
where
    A: Serialize + ?Sized,
    B: Serialize + ?Sized,
{
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Deterministic trace id for a merge over these results
pub(crate) fn merged_trace<T>(strategy: &str, results: &[TaggedValue<T>]) -> TraceId {
    TraceId::derive(strategy, results.iter().map(TaggedValue::trace_id))
}

/// Build the merged value, surfacing an out-of-range confidence as an error
pub(crate) fn merged_value<R, T>(
    strategy: &str,
    value: R,
    confidence: f64,
    results: &[TaggedValue<T>],
) -> Result<TaggedValue<R>, MergeError> {
    TaggedValue::merged(value, confidence, merged_trace(strategy, results)).map_err(|err| match err {
        ValueError::ConfidenceOutOfRange { value } => MergeError::OutputOutOfRange {
            strategy: strategy.to_string(),
            quantity: "confidence",
            value,
        },
        ValueError::EmptyOrigin => MergeError::ForeignOrigin {
            strategy: strategy.to_string(),
            origin: String::new(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_nesting() {
        let c = MergeConflict::whole(vec![], Resolution::Voted).nested_under("status");
        assert_eq!(c.field.as_deref(), Some("status"));

        let c = c.nested_under("ticket");
        assert_eq!(c.field.as_deref(), Some("ticket.status"));
    }

    #[test]
    fn resolution_serializes_lowercase() {
        let json = serde_json::to_value(Resolution::Averaged).unwrap();
        assert_eq!(json, "averaged");
    }

    #[test]
    fn conflict_omits_missing_field() {
        let c = MergeConflict::whole(vec![Value::from(1)], Resolution::First);
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("field").is_none());
    }

    #[test]
    fn structural_eq_ignores_key_order() {
        let a = serde_json::json!({"a": 1, "b": 2});
        let b = serde_json::json!({"b": 2, "a": 1});
        assert!(structural_eq(&a, &b));
        assert!(!structural_eq(&a, &serde_json::json!({"a": 1})));
    }

    #[test]
    fn value_key_ignores_key_order() {
        let a = serde_json::json!({"b": {"y": 1, "x": 2}, "a": [{"d": 0, "c": 1}]});
        let b = serde_json::json!({"a": [{"c": 1, "d": 0}], "b": {"x": 2, "y": 1}});
        let key = value_key("test", &a).unwrap();
        assert_eq!(key, value_key("test", &b).unwrap());
        assert_eq!(key, r#"{"a":[{"c":1,"d":0}],"b":{"x":2,"y":1}}"#);
    }

    #[test]
    fn error_reports_strategy_and_branch() {
        let err = MergeError::InvalidConfidence {
            strategy: "weighted-vote".into(),
            branch: 2,
            value: 1.4,
        };
        assert_eq!(err.strategy(), Some("weighted-vote"));
        assert_eq!(err.branch(), Some(2));
        let msg = err.to_string();
        assert!(msg.contains("weighted-vote"));
        assert!(msg.contains("branch 2"));
    }

    #[test]
    fn remap_translates_branch() {
        let err = MergeError::InvalidInput {
            strategy: "s".into(),
            branch: 1,
            reason: "bad".into(),
        }
        .remap_branch(&[0, 3, 4]);
        assert_eq!(err.branch(), Some(3));
    }

    #[test]
    fn configuration_errors() {
        assert!(MergeError::EmptyInput { strategy: "s".into() }.is_configuration());
        assert!(MergeError::UnknownStrategy { name: "x".into() }.is_configuration());
        assert!(!MergeError::ConsensusNotReached {
            strategy: "s".into(),
            agreeing: 1,
            required: 2,
            total: 3
        }
        .is_configuration());
    }
}
