//! Weighted vote strategy
//!
//! Categorical merge: each branch votes for its value with its confidence as
//! weight; the value with the highest total weight wins.

use crate::strategy::{
    merged_value, structural_eq, to_json, value_key, values_json, MergeConflict, MergeError,
    MergeProvenance, MergeResult, MergeStrategy, RejectedValue, Resolution,
};
use fm_value::TaggedValue;
use indexmap::IndexMap;
use serde::Serialize;

/// Weighted vote over categorical values
///
/// # Characteristics
/// - Values are compared structurally (through their JSON form)
/// - Winner = highest total confidence
/// - Ties: the value seen first in branch order wins
/// - `consensus_level` = winner weight / total weight
/// - Merged confidence equals the winner's weight share
///
/// When every branch reports zero confidence, votes are counted unweighted and
/// the merged confidence is `0.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeightedVote;

/// Running tally for one distinct value
#[derive(Debug)]
struct Tally {
    first: usize,
    weight: f64,
    branches: Vec<usize>,
}

impl WeightedVote {
    /// Strategy name
    pub const NAME: &'static str = "weighted-vote";

    /// Create new weighted vote strategy
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Group branches by value, preserving first-seen order
    fn tally<T: Serialize>(results: &[TaggedValue<T>]) -> Result<IndexMap<String, Tally>, MergeError> {
        let mut tallies: IndexMap<String, Tally> = IndexMap::new();

        for (branch, result) in results.iter().enumerate() {
            let key = value_key(Self::NAME, result.value())?;
            let tally = tallies.entry(key).or_insert_with(|| Tally {
                first: branch,
                weight: 0.0,
                branches: Vec::new(),
            });
            tally.weight += result.confidence();
            tally.branches.push(branch);
        }

        Ok(tallies)
    }
}

impl<T> MergeStrategy<T, T> for WeightedVote
where
    T: Clone + Serialize,
{
    fn name(&self) -> &str {
        Self::NAME
    }

    #[allow(clippy::cast_precision_loss)]
    fn merge(&self, results: &[TaggedValue<T>]) -> Result<MergeResult<T>, MergeError> {
        let mut tallies = Self::tally(results)?;

        let total_weight: f64 = results.iter().map(TaggedValue::confidence).sum();
        let unweighted = total_weight <= 0.0;
        if unweighted {
            for tally in tallies.values_mut() {
                tally.weight = tally.branches.len() as f64;
            }
        }
        let total = if unweighted {
            results.len() as f64
        } else {
            total_weight
        };

        // Strictly greater replaces, so the first-seen value keeps a tie
        let mut winner: Option<&Tally> = None;
        for tally in tallies.values() {
            if winner.map_or(true, |w| tally.weight > w.weight) {
                winner = Some(tally);
            }
        }
        let winner = winner.ok_or_else(|| MergeError::EmptyInput {
            strategy: Self::NAME.to_string(),
        })?;

        let share = winner.weight / total;
        let confidence = if unweighted { 0.0 } else { share };

        let mut rejected = Vec::new();
        for (branch, result) in results.iter().enumerate() {
            if winner.branches.contains(&branch) {
                continue;
            }
            let loser_weight = tallies
                .values()
                .find(|t| t.branches.contains(&branch))
                .map_or(0.0, |t| t.weight);
            rejected.push(RejectedValue::new(
                branch,
                to_json(Self::NAME, result.value())?,
                format!(
                    "outvoted: weight {loser_weight:.3} vs winning weight {:.3}",
                    winner.weight
                ),
            ));
        }

        let conflicts = if tallies.len() > 1 {
            vec![MergeConflict::whole(
                values_json(Self::NAME, results)?,
                Resolution::Voted,
            )]
        } else {
            Vec::new()
        };

        let value = results[winner.first].value().clone();

        Ok(MergeResult {
            value: merged_value(Self::NAME, value, confidence, results)?,
            provenance: MergeProvenance {
                contributing_branches: winner.branches.clone(),
                rejected_values: rejected,
                consensus_level: share,
            },
            conflicts,
        })
    }

    fn agrees(&self, branch: &T, merged: &T) -> bool {
        structural_eq(branch, merged)
    }
}
