//! Fork results

use crate::branch::CacheReuse;
use crate::executor::DispatchStrategy;
use crate::warmup::WarmupKind;
use chrono::{DateTime, Utc};
use fm_value::TaggedValue;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Outcome of one fork call
///
/// Immutable once built. `results[i]` is branch `i`'s value regardless of
/// completion order.
#[derive(Debug, Clone)]
pub struct ForkResult<T> {
    results: Vec<TaggedValue<T>>,
    cache_stats: CacheStats,
    metadata: ForkMetadata,
}

impl<T> ForkResult<T> {
    pub(crate) fn new(
        results: Vec<TaggedValue<T>>,
        cache_stats: CacheStats,
        metadata: ForkMetadata,
    ) -> Self {
        Self {
            results,
            cache_stats,
            metadata,
        }
    }

    /// Branch results in branch-index order
    #[inline]
    #[must_use]
    pub fn results(&self) -> &[TaggedValue<T>] {
        &self.results
    }

    /// Warmup cost and per-branch cache reuse
    #[inline]
    #[must_use]
    pub fn cache_stats(&self) -> &CacheStats {
        &self.cache_stats
    }

    /// Execution metadata
    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &ForkMetadata {
        &self.metadata
    }

    /// Number of branch results
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Always false for a fork that returned; kept for API symmetry
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Reported cost of the whole fork
    ///
    /// Sum of branch costs, plus the primer cost under explicit warmup. Under
    /// first-branch warmup the priming call is branch 0 and is counted once.
    #[must_use]
    pub fn total_cost(&self) -> f64 {
        let branches: f64 = self.cache_stats.branch_costs.iter().sum();
        if self.metadata.warmup == WarmupKind::Explicit {
            branches + self.cache_stats.warmup_cost
        } else {
            branches
        }
    }

    /// Take the results, dropping stats and metadata
    #[inline]
    #[must_use]
    pub fn into_results(self) -> Vec<TaggedValue<T>> {
        self.results
    }
}

/// Cost and cache telemetry for one fork
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reported cost of the warmup call; `0.0` when none ran
    pub warmup_cost: f64,

    /// A warmup call completed before dispatch
    pub warmup_ran: bool,

    /// Cache reuse reported by each branch, in branch order
    pub branch_cache: Vec<CacheReuse>,

    /// Cost reported by each branch, in branch order
    pub branch_costs: Vec<f64>,
}

impl CacheStats {
    /// Branches that reported any cache reuse
    #[must_use]
    pub fn hits(&self) -> usize {
        self.branch_cache.iter().filter(|c| c.is_hit()).count()
    }
}

/// Identity and timing of one fork
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkMetadata {
    /// Fork id, also the tracing span field
    pub fork_id: Uuid,

    /// Dispatch strategy used
    pub strategy: DispatchStrategy,

    /// Warmup mode actually applied
    pub warmup: WarmupKind,

    /// Wall-clock start
    pub started_at: DateTime<Utc>,

    /// Time from start to last branch completion
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fm_value::TraceId;

    fn result(warmup: WarmupKind, warmup_cost: f64) -> ForkResult<u8> {
        let values = vec![
            TaggedValue::new(1, 0.5, "a", TraceId::new()).unwrap(),
            TaggedValue::new(2, 0.5, "b", TraceId::new()).unwrap(),
        ];
        ForkResult::new(
            values,
            CacheStats {
                warmup_cost,
                warmup_ran: warmup != WarmupKind::None,
                branch_cache: vec![CacheReuse::Miss, CacheReuse::Tokens(900)],
                branch_costs: vec![0.25, 0.5],
            },
            ForkMetadata {
                fork_id: Uuid::nil(),
                strategy: DispatchStrategy::CacheOptimized,
                warmup,
                started_at: Utc::now(),
                elapsed: Duration::from_millis(3),
            },
        )
    }

    #[test]
    fn total_cost_counts_primer_once() {
        assert_eq!(result(WarmupKind::Explicit, 0.125).total_cost(), 0.875);
        assert_eq!(result(WarmupKind::FirstBranch, 0.25).total_cost(), 0.75);
        assert_eq!(result(WarmupKind::None, 0.0).total_cost(), 0.75);
    }

    #[test]
    fn accessors() {
        let r = result(WarmupKind::None, 0.0);
        assert_eq!(r.len(), 2);
        assert!(!r.is_empty());
        assert_eq!(r.cache_stats().hits(), 1);
        let values: Vec<u8> = r.into_results().into_iter().map(TaggedValue::into_value).collect();
        assert_eq!(values, vec![1, 2]);
    }
}
