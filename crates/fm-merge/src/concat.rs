//! Concatenation strategy
//!
//! Array merge: branch lists are concatenated in branch order, optionally
//! deduplicated and capped.

use crate::strategy::{
    merged_value, to_json, value_key, MergeError, MergeProvenance, MergeResult, MergeStrategy,
    RejectedValue,
};
use fm_value::{mean_confidence, TaggedValue};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Concatenate list values from every branch
///
/// # Characteristics
/// - Items keep branch order, then in-branch order
/// - Deduplication (optional) folds structurally equal items into the first
///   occurrence, keeping the highest branch confidence for the folded item
/// - `max_items` (optional) keeps the first N retained items; the rest are
///   recorded as rejected
/// - Merged confidence = mean item confidence of retained items
/// - `consensus_level` is always `1.0`: concatenation has no disagreement notion
///
/// Also merges JSON values: arrays contribute their elements, any other value
/// contributes itself as a single item.
#[derive(Debug, Clone, Copy, Default)]
pub struct Concat {
    dedupe: bool,
    max_items: Option<usize>,
}

/// One retained item with its folded metadata
#[derive(Debug)]
struct Item<E> {
    value: E,
    confidence: f64,
    branches: Vec<usize>,
}

impl Concat {
    /// Strategy name
    pub const NAME: &'static str = "concat";

    /// Plain concatenation
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold duplicate items
    #[inline]
    #[must_use]
    pub fn deduplicated(mut self) -> Self {
        self.dedupe = true;
        self
    }

    /// Keep at most `max` items
    #[inline]
    #[must_use]
    pub fn with_max_items(mut self, max: usize) -> Self {
        self.max_items = Some(max);
        self
    }

    /// Core concatenation over per-branch item lists
    fn concat<E, T>(
        &self,
        lists: Vec<Vec<E>>,
        results: &[TaggedValue<T>],
    ) -> Result<MergeResult<Vec<E>>, MergeError>
    where
        E: Serialize,
    {
        let mut items: IndexMap<String, Item<E>> = IndexMap::new();
        let mut sequence = 0usize;

        for (branch, list) in lists.into_iter().enumerate() {
            let confidence = results[branch].confidence();
            for value in list {
                let key = if self.dedupe {
                    value_key(Self::NAME, &value)?
                } else {
                    sequence += 1;
                    format!("#{sequence}")
                };
                match items.get_mut(&key) {
                    Some(item) => {
                        item.confidence = item.confidence.max(confidence);
                        if !item.branches.contains(&branch) {
                            item.branches.push(branch);
                        }
                    }
                    None => {
                        items.insert(
                            key,
                            Item {
                                value,
                                confidence,
                                branches: vec![branch],
                            },
                        );
                    }
                }
            }
        }

        let mut retained: Vec<Item<E>> = items.into_values().collect();
        let mut rejected = Vec::new();
        if let Some(max) = self.max_items {
            if retained.len() > max {
                for item in retained.split_off(max) {
                    rejected.push(RejectedValue::new(
                        item.branches[0],
                        to_json(Self::NAME, &item.value)?,
                        format!("exceeded max items ({max})"),
                    ));
                }
            }
        }

        let contributing: BTreeSet<usize> = retained
            .iter()
            .flat_map(|item| item.branches.iter().copied())
            .collect();

        let confidence = mean_confidence(retained.iter().map(|item| item.confidence))
            .or_else(|| mean_confidence(results.iter().map(TaggedValue::confidence)))
            .unwrap_or(0.0);

        let value: Vec<E> = retained.into_iter().map(|item| item.value).collect();

        Ok(MergeResult {
            value: merged_value(Self::NAME, value, confidence, results)?,
            provenance: MergeProvenance {
                contributing_branches: contributing.into_iter().collect(),
                rejected_values: rejected,
                consensus_level: 1.0,
            },
            conflicts: Vec::new(),
        })
    }
}

impl<E> MergeStrategy<Vec<E>, Vec<E>> for Concat
where
    E: Clone + Serialize,
{
    fn name(&self) -> &str {
        Self::NAME
    }

    fn merge(&self, results: &[TaggedValue<Vec<E>>]) -> Result<MergeResult<Vec<E>>, MergeError> {
        let lists = results.iter().map(|r| r.value().clone()).collect();
        self.concat(lists, results)
    }

    /// A branch agrees when every one of its items made it into the result
    fn agrees(&self, branch: &Vec<E>, merged: &Vec<E>) -> bool {
        let merged: Vec<Value> = merged.iter().filter_map(|e| serde_json::to_value(e).ok()).collect();
        branch.iter().all(|item| {
            serde_json::to_value(item).is_ok_and(|item| merged.contains(&item))
        })
    }
}

impl MergeStrategy<Value, Value> for Concat {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn merge(&self, results: &[TaggedValue<Value>]) -> Result<MergeResult<Value>, MergeError> {
        let lists = results.iter().map(|r| items_of(r.value())).collect();
        let merged = self.concat(lists, results)?;
        Ok(MergeResult {
            value: merged.value.map(Value::Array),
            provenance: merged.provenance,
            conflicts: merged.conflicts,
        })
    }

    fn agrees(&self, branch: &Value, merged: &Value) -> bool {
        let merged = items_of(merged);
        items_of(branch).iter().all(|item| merged.contains(item))
    }
}

fn items_of(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}
