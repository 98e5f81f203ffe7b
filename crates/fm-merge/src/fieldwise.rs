//! Field-by-field object merge
//!
//! [`Fieldwise`] merges JSON objects one field at a time, each field with its
//! own strategy, and unions the per-field provenance and conflicts.

use crate::engine::merge;
use crate::strategy::{
    merged_value, structural_eq, DynStrategy, MergeConflict, MergeError, MergeProvenance,
    MergeResult, MergeStrategy, RejectedValue, Resolution,
};
use fm_value::{mean_confidence, TaggedValue};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Per-field object merge
///
/// # Characteristics
/// - Every branch value must be a JSON object
/// - Fields are visited in sorted order; a field is merged over the branches
///   that carry it
/// - Fields without a configured strategy use the default strategy if set,
///   otherwise the first branch's value wins (resolution `first`)
/// - Merged confidence = mean of per-field confidences
/// - `consensus_level` = mean of per-field consensus levels
#[derive(Debug, Default)]
pub struct Fieldwise {
    fields: BTreeMap<String, DynStrategy>,
    default: Option<DynStrategy>,
}

/// Outcome of merging one field, with indices already mapped to branches
struct FieldOutcome {
    value: Value,
    confidence: f64,
    consensus: f64,
    contributing: Vec<usize>,
    rejected: Vec<RejectedValue>,
    conflicts: Vec<MergeConflict>,
}

impl Fieldwise {
    /// Strategy name
    pub const NAME: &'static str = "fieldwise";

    /// Create fieldwise strategy with no field strategies
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `field` with `strategy`
    #[must_use]
    pub fn field<S>(mut self, field: impl Into<String>, strategy: S) -> Self
    where
        S: MergeStrategy<Value, Value> + 'static,
    {
        self.fields.insert(field.into(), Box::new(strategy));
        self
    }

    /// Merge `field` with an already boxed strategy
    #[must_use]
    pub fn field_boxed(mut self, field: impl Into<String>, strategy: DynStrategy) -> Self {
        self.fields.insert(field.into(), strategy);
        self
    }

    /// Strategy for fields without their own entry
    #[must_use]
    pub fn with_default<S>(mut self, strategy: S) -> Self
    where
        S: MergeStrategy<Value, Value> + 'static,
    {
        self.default = Some(Box::new(strategy));
        self
    }

    /// Default strategy, already boxed
    #[must_use]
    pub fn with_default_boxed(mut self, strategy: DynStrategy) -> Self {
        self.default = Some(strategy);
        self
    }

    /// Names of fields with a configured strategy
    pub fn configured_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    fn objects<'a>(results: &'a [TaggedValue<Value>]) -> Result<Vec<&'a Map<String, Value>>, MergeError> {
        results
            .iter()
            .enumerate()
            .map(|(branch, r)| {
                r.value().as_object().ok_or_else(|| MergeError::InvalidInput {
                    strategy: Self::NAME.to_string(),
                    branch,
                    reason: "value is not an object".to_string(),
                })
            })
            .collect()
    }

    fn merge_field(
        &self,
        field: &str,
        results: &[TaggedValue<Value>],
        objects: &[&Map<String, Value>],
    ) -> Result<FieldOutcome, MergeError> {
        let mut sub = Vec::new();
        let mut index_map = Vec::new();
        for (branch, object) in objects.iter().enumerate() {
            if let Some(value) = object.get(field) {
                let source = &results[branch];
                sub.push(TaggedValue::new_unchecked(
                    value.clone(),
                    source.confidence(),
                    source.origin(),
                    source.trace_id().clone(),
                ));
                index_map.push(branch);
            }
        }

        let strategy = self.fields.get(field).or(self.default.as_ref());
        let merged = match strategy {
            Some(strategy) => merge(&sub, strategy.as_ref()),
            None => first_wins(&sub),
        }
        .map_err(|source| MergeError::FieldFailed {
            strategy: Self::NAME.to_string(),
            field: field.to_string(),
            source: Box::new(source.remap_branch(&index_map)),
        })?;

        let remap = |b: usize| index_map.get(b).copied().unwrap_or(b);

        Ok(FieldOutcome {
            confidence: merged.value.confidence(),
            value: merged.value.into_value(),
            consensus: merged.provenance.consensus_level,
            contributing: merged
                .provenance
                .contributing_branches
                .into_iter()
                .map(remap)
                .collect(),
            rejected: merged
                .provenance
                .rejected_values
                .into_iter()
                .map(|r| RejectedValue::new(remap(r.branch), r.value, format!("field '{field}': {}", r.reason)))
                .collect(),
            conflicts: merged
                .conflicts
                .into_iter()
                .map(|c| c.nested_under(field))
                .collect(),
        })
    }
}

/// Keep the first branch's value, logging disagreement
#[allow(clippy::cast_precision_loss)]
fn first_wins(results: &[TaggedValue<Value>]) -> Result<MergeResult<Value>, MergeError> {
    let Some(first) = results.first() else {
        return Err(MergeError::EmptyInput {
            strategy: Fieldwise::NAME.to_string(),
        });
    };

    let mut rejected = Vec::new();
    for (branch, result) in results.iter().enumerate().skip(1) {
        if !structural_eq(result.value(), first.value()) {
            rejected.push(RejectedValue::new(
                branch,
                result.value().clone(),
                "superseded by first branch value",
            ));
        }
    }

    let agreeing = results.len() - rejected.len();
    let conflicts = if rejected.is_empty() {
        Vec::new()
    } else {
        vec![MergeConflict::whole(
            results.iter().map(|r| r.value().clone()).collect(),
            Resolution::First,
        )]
    };

    Ok(MergeResult {
        value: merged_value(
            Fieldwise::NAME,
            first.value().clone(),
            first.confidence(),
            results,
        )?,
        provenance: MergeProvenance {
            contributing_branches: vec![0],
            rejected_values: rejected,
            consensus_level: agreeing as f64 / results.len() as f64,
        },
        conflicts,
    })
}

impl MergeStrategy<Value, Value> for Fieldwise {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn merge(&self, results: &[TaggedValue<Value>]) -> Result<MergeResult<Value>, MergeError> {
        let objects = Self::objects(results)?;

        let names: BTreeSet<&String> = objects.iter().flat_map(|o| o.keys()).collect();

        let mut value = Map::new();
        let mut confidences = Vec::with_capacity(names.len());
        let mut consensus = Vec::with_capacity(names.len());
        let mut contributing = BTreeSet::new();
        let mut rejected = Vec::new();
        let mut conflicts = Vec::new();

        for name in names {
            let outcome = self.merge_field(name, results, &objects)?;
            value.insert(name.clone(), outcome.value);
            confidences.push(outcome.confidence);
            consensus.push(outcome.consensus);
            contributing.extend(outcome.contributing);
            rejected.extend(outcome.rejected);
            conflicts.extend(outcome.conflicts);
        }

        let confidence = mean_confidence(confidences)
            .or_else(|| mean_confidence(results.iter().map(TaggedValue::confidence)))
            .unwrap_or(0.0);
        let consensus_level = mean_confidence(consensus).unwrap_or(1.0);
        if contributing.is_empty() {
            contributing.extend(0..results.len());
        }

        Ok(MergeResult {
            value: merged_value(Self::NAME, Value::Object(value), confidence, results)?,
            provenance: MergeProvenance {
                contributing_branches: contributing.into_iter().collect(),
                rejected_values: rejected,
                consensus_level,
            },
            conflicts,
        })
    }

    /// A branch agrees when every configured field agrees under its strategy,
    /// and every other field is structurally equal
    fn agrees(&self, branch: &Value, merged: &Value) -> bool {
        let (Some(branch), Some(merged)) = (branch.as_object(), merged.as_object()) else {
            return false;
        };
        branch.iter().all(|(field, value)| {
            let Some(merged_field) = merged.get(field) else {
                return false;
            };
            match self.fields.get(field).or(self.default.as_ref()) {
                Some(strategy) => strategy.agrees(value, merged_field),
                None => structural_eq(value, merged_field),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StrategyExt, WeightedAverage, WeightedVote};
    use fm_value::TraceId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn obj(value: Value, confidence: f64) -> TaggedValue<Value> {
        TaggedValue::new(value, confidence, "extractor", TraceId::new()).unwrap()
    }

    fn ticket_strategy() -> Fieldwise {
        Fieldwise::new()
            .field("priority", WeightedVote::new())
            .field("estimate", WeightedAverage::new().into_json::<f64>())
    }

    #[test]
    fn merges_each_field_with_its_strategy() {
        let results = vec![
            obj(json!({"priority": "high", "estimate": 10.0}), 0.9),
            obj(json!({"priority": "low", "estimate": 20.0}), 0.4),
            obj(json!({"priority": "high", "estimate": 30.0}), 0.3),
        ];
        let merged = merge(&results, &ticket_strategy()).unwrap();

        assert_eq!(merged.value.value()["priority"], json!("high"));
        let estimate = merged.value.value()["estimate"].as_f64().unwrap();
        assert!((estimate - 16.25).abs() < 1e-9);

        let fields: Vec<_> = merged.conflicts.iter().map(|c| c.field.clone()).collect();
        assert!(fields.contains(&Some("priority".to_string())));
        assert!(fields.contains(&Some("estimate".to_string())));

        let rejected = &merged.provenance.rejected_values;
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].branch, 1);
        assert!(rejected[0].reason.starts_with("field 'priority': "));
    }

    #[test]
    fn consensus_is_mean_of_fields() {
        let results = vec![
            obj(json!({"a": "x", "b": "y"}), 0.5),
            obj(json!({"a": "x", "b": "z"}), 0.5),
        ];
        let strategy = Fieldwise::new().with_default(WeightedVote::new());
        let merged = merge(&results, &strategy).unwrap();
        // a: unanimous (1.0), b: tie at 0.5
        assert!((merged.provenance.consensus_level - 0.75).abs() < 1e-9);
    }

    #[test]
    fn unmapped_fields_keep_first_value() {
        let results = vec![
            obj(json!({"title": "Crash on save"}), 0.6),
            obj(json!({"title": "Crash when saving"}), 0.8),
        ];
        let merged = merge(&results, &Fieldwise::new()).unwrap();
        assert_eq!(merged.value.value(), &json!({"title": "Crash on save"}));
        assert_eq!(merged.conflicts.len(), 1);
        assert_eq!(merged.conflicts[0].resolution, Resolution::First);
        assert_eq!(merged.conflicts[0].field.as_deref(), Some("title"));
        assert_eq!(merged.provenance.consensus_level, 0.5);
    }

    #[test]
    fn missing_fields_map_back_to_branch_indices() {
        let results = vec![
            obj(json!({"a": 1}), 0.5),
            obj(json!({"b": "only"}), 0.5),
            obj(json!({"a": 2}), 0.5),
        ];
        let strategy = Fieldwise::new().field("a", WeightedVote::new());
        let merged = merge(&results, &strategy).unwrap();

        assert_eq!(merged.value.value(), &json!({"a": 1, "b": "only"}));
        assert_eq!(merged.provenance.rejected_values[0].branch, 2);
        assert_eq!(merged.provenance.contributing_branches, vec![0, 1]);
    }

    #[test]
    fn non_object_rejected() {
        let results = vec![obj(json!({"a": 1}), 0.5), obj(json!([1, 2]), 0.5)];
        let err = merge(&results, &Fieldwise::new()).unwrap_err();
        assert!(matches!(err, MergeError::InvalidInput { branch: 1, .. }));
    }

    #[test]
    fn field_errors_carry_field_and_branch() {
        let results = vec![
            obj(json!({"b": 0}), 0.5),
            obj(json!({"a": 1.0}), 0.5),
            obj(json!({"a": "NaN-ish"}), 0.5),
        ];
        let strategy = Fieldwise::new().field("a", WeightedAverage::new().into_json::<f64>());
        let err = merge(&results, &strategy).unwrap_err();
        assert!(matches!(err, MergeError::FieldFailed { ref field, .. } if field == "a"));
        assert_eq!(err.branch(), Some(2));
    }

    #[test]
    fn empty_objects_merge_to_empty_object() {
        let results = vec![obj(json!({}), 0.4), obj(json!({}), 0.6)];
        let merged = merge(&results, &Fieldwise::new()).unwrap();
        assert_eq!(merged.value.value(), &json!({}));
        assert!((merged.value.confidence() - 0.5).abs() < 1e-9);
        assert_eq!(merged.provenance.consensus_level, 1.0);
    }
}
