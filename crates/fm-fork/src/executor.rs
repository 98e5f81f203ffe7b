//! Fork executor
//!
//! Runs N branches concurrently, optionally behind a warmup barrier, and
//! reassembles their results in branch-index order.
//!
//! # Characteristics
//! - One spawned task per branch, no concurrency cap
//! - Fail-fast: the first branch failure aborts every in-flight sibling
//! - Results are collected into pre-sized index slots, never a channel

use crate::branch::{BranchOutcome, ExecutionContext, SharedBranch};
use crate::config::ForkConfig;
use crate::error::ForkError;
use crate::result::{CacheStats, ForkMetadata, ForkResult};
use crate::schema::{detect_conflict, handle_schema_conflict, ConflictBehavior, SchemaSignature};
use crate::warmup::{Warmup, WarmupKind, WarmupScheduler};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{AbortHandle, JoinError};
use tracing::Instrument;
use uuid::Uuid;

/// How branches are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchStrategy {
    /// Dispatch everything at once; warmup requests are ignored
    #[default]
    FastParallel,

    /// Run the warmup phase, then dispatch everything at once
    CacheOptimized,
}

impl DispatchStrategy {
    /// Stable name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FastParallel => "fast-parallel",
            Self::CacheOptimized => "cache-optimized",
        }
    }

    /// Whether this strategy honors warmup requests
    #[inline]
    #[must_use]
    pub fn allows_warmup(self) -> bool {
        matches!(self, Self::CacheOptimized)
    }
}

impl fmt::Display for DispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized dispatch strategy name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown dispatch strategy '{0}', expected fast-parallel or cache-optimized")]
pub struct UnknownDispatchStrategy(pub String);

impl FromStr for DispatchStrategy {
    type Err = UnknownDispatchStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast-parallel" => Ok(Self::FastParallel),
            "cache-optimized" => Ok(Self::CacheOptimized),
            other => Err(UnknownDispatchStrategy(other.to_string())),
        }
    }
}

/// Per-call fork options
#[derive(Debug, Clone, Default)]
pub struct ForkOptions {
    /// Dispatch strategy
    pub strategy: DispatchStrategy,

    /// Warmup request
    pub warmup: Warmup,

    /// Expected output signature per branch, checked before dispatch
    pub signatures: Option<Vec<SchemaSignature>>,

    /// Severity of a signature conflict
    pub on_schema_conflict: ConflictBehavior,
}

impl ForkOptions {
    /// Options for `strategy`, no warmup, no schema check
    #[inline]
    #[must_use]
    pub fn new(strategy: DispatchStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// With warmup request
    #[inline]
    #[must_use]
    pub fn with_warmup(mut self, warmup: Warmup) -> Self {
        self.warmup = warmup;
        self
    }

    /// With one expected signature per branch
    #[inline]
    #[must_use]
    pub fn with_signatures(mut self, signatures: Vec<SchemaSignature>) -> Self {
        self.signatures = Some(signatures);
        self
    }

    /// With schema conflict severity
    #[inline]
    #[must_use]
    pub fn with_schema_conflict(mut self, behavior: ConflictBehavior) -> Self {
        self.on_schema_conflict = behavior;
        self
    }
}

/// Concurrent branch executor
///
/// Stateless between calls; clones share one configuration and may fork
/// concurrently.
#[derive(Debug, Clone, Default)]
pub struct ForkExecutor {
    config: Arc<ForkConfig>,
}

impl ForkExecutor {
    /// Executor with default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Executor with configuration
    #[inline]
    #[must_use]
    pub fn with_config(config: ForkConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ForkConfig {
        &self.config
    }

    /// Options seeded from configured defaults
    ///
    /// A configured `explicit` default warmup has no primer to run and maps to
    /// no warmup.
    #[must_use]
    pub fn options(&self) -> ForkOptions {
        let warmup = match self.config.default_warmup {
            WarmupKind::FirstBranch => Warmup::FirstBranch,
            WarmupKind::None | WarmupKind::Explicit => Warmup::None,
        };
        ForkOptions::new(self.config.default_strategy)
            .with_warmup(warmup)
            .with_schema_conflict(self.config.on_schema_conflict)
    }

    /// Run `branches` concurrently under `strategy`
    ///
    /// # Errors
    /// - [`ForkError::EmptyFork`] for an empty branch list
    /// - [`ForkError::Warmup`] if an explicit primer fails
    /// - the first branch failure, with every sibling aborted
    pub async fn fork<T>(
        &self,
        branches: Vec<SharedBranch<T>>,
        strategy: DispatchStrategy,
        warmup: Warmup,
    ) -> Result<ForkResult<T>, ForkError>
    where
        T: Send + 'static,
    {
        let options = ForkOptions::new(strategy)
            .with_warmup(warmup)
            .with_schema_conflict(self.config.on_schema_conflict);
        self.fork_with(branches, options).await
    }

    /// Run `branches` concurrently with full options
    ///
    /// # Errors
    /// As [`fork`](Self::fork), plus
    /// - [`ForkError::InvalidOptions`] if the signature count differs from the branch count
    /// - [`ForkError::SchemaConflict`] if signatures diverge under [`ConflictBehavior::Error`]
    pub async fn fork_with<T>(
        &self,
        branches: Vec<SharedBranch<T>>,
        options: ForkOptions,
    ) -> Result<ForkResult<T>, ForkError>
    where
        T: Send + 'static,
    {
        let strategy = options.strategy;
        if branches.is_empty() {
            return Err(ForkError::EmptyFork { strategy });
        }

        if let Some(signatures) = &options.signatures {
            if signatures.len() != branches.len() {
                return Err(ForkError::InvalidOptions {
                    strategy,
                    reason: format!(
                        "{} signatures supplied for {} branches",
                        signatures.len(),
                        branches.len()
                    ),
                });
            }
            let report = detect_conflict(signatures);
            handle_schema_conflict(&report, options.on_schema_conflict)
                .map_err(|source| ForkError::SchemaConflict { strategy, source })?;
        }

        let fork_id = Uuid::new_v4();
        let span = tracing::info_span!("fork", %fork_id, %strategy, branches = branches.len());
        self.dispatch(fork_id, branches, strategy, options.warmup)
            .instrument(span)
            .await
    }

    async fn dispatch<T>(
        &self,
        fork_id: Uuid,
        branches: Vec<SharedBranch<T>>,
        strategy: DispatchStrategy,
        warmup: Warmup,
    ) -> Result<ForkResult<T>, ForkError>
    where
        T: Send + 'static,
    {
        let started_at = Utc::now();
        let clock = Instant::now();
        let count = branches.len();

        let warmup = if strategy.allows_warmup() || warmup.kind() == WarmupKind::None {
            warmup
        } else {
            tracing::warn!(warmup = %warmup.kind(), "warmup ignored under fast-parallel dispatch");
            Warmup::None
        };
        tracing::info!(warmup = %warmup.kind(), "fork started");

        let phase = WarmupScheduler::new(strategy)
            .schedule(
                &warmup,
                &branches,
                ExecutionContext::new(fork_id, 0, count, false, self.clone()),
            )
            .await?;
        let warmed = phase.report.ran;

        let mut slots: Vec<Option<BranchOutcome<T>>> = (0..count).map(|_| None).collect();
        let skip = usize::from(phase.first_branch.is_some());
        if let Some(first) = phase.first_branch {
            slots[0] = Some(first);
        }

        let mut tasks = AbortOnDrop::with_capacity(count);
        let mut pending = FuturesUnordered::new();
        for (index, branch) in branches.iter().enumerate().skip(skip) {
            let branch = Arc::clone(branch);
            let ctx = ExecutionContext::new(fork_id, index, count, warmed, self.clone());
            let handle = tokio::spawn(async move { branch.run(ctx).await });
            tasks.track(handle.abort_handle());
            pending.push(handle.map(move |joined| (index, joined)));
        }

        while let Some((index, joined)) = pending.next().await {
            let failure = match joined {
                Ok(Ok(outcome)) => match accept_outcome(index, strategy, outcome) {
                    Ok(outcome) => {
                        tracing::debug!(
                            branch = index,
                            confidence = outcome.value.confidence(),
                            cost = outcome.usage.cost,
                            "branch completed"
                        );
                        slots[index] = Some(outcome);
                        continue;
                    }
                    Err(err) => err,
                },
                Ok(Err(source)) => ForkError::Branch {
                    index,
                    strategy,
                    source,
                },
                Err(err) => join_failure(index, strategy, err),
            };

            tracing::error!(branch = index, error = %failure, "branch failed, aborting fork");
            tasks.abort_all();
            return Err(failure);
        }

        let mut results = Vec::with_capacity(count);
        let mut branch_cache = Vec::with_capacity(count);
        let mut branch_costs = Vec::with_capacity(count);
        for outcome in slots.into_iter().flatten() {
            branch_cache.push(outcome.usage.cache);
            branch_costs.push(outcome.usage.cost);
            results.push(outcome.value);
        }

        let cache_stats = CacheStats {
            warmup_cost: phase.report.cost,
            warmup_ran: warmed,
            branch_cache,
            branch_costs,
        };
        let metadata = ForkMetadata {
            fork_id,
            strategy,
            warmup: warmup.kind(),
            started_at,
            elapsed: clock.elapsed(),
        };

        tracing::info!(
            results = results.len(),
            warmup_cost = cache_stats.warmup_cost,
            elapsed_ms = u64::try_from(metadata.elapsed.as_millis()).unwrap_or(u64::MAX),
            "fork completed"
        );
        Ok(ForkResult::new(results, cache_stats, metadata))
    }
}

/// Validate a branch's tagged value before it enters the result set
pub(crate) fn accept_outcome<T>(
    index: usize,
    strategy: DispatchStrategy,
    outcome: BranchOutcome<T>,
) -> Result<BranchOutcome<T>, ForkError> {
    outcome
        .value
        .validate()
        .map_err(|source| ForkError::InvalidBranchValue {
            index,
            strategy,
            source,
        })?;
    Ok(outcome)
}

/// Map a task join failure to a branch error
pub(crate) fn join_failure(index: usize, strategy: DispatchStrategy, err: JoinError) -> ForkError {
    let message = match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(_) => "cancelled".to_string(),
    };
    ForkError::BranchPanicked {
        index,
        strategy,
        message,
    }
}

/// Aborts tracked tasks when dropped, so a cancelled fork leaves no stragglers
pub(crate) struct AbortOnDrop(Vec<AbortHandle>);

impl AbortOnDrop {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub(crate) fn track(&mut self, handle: AbortHandle) {
        self.0.push(handle);
    }

    pub(crate) fn abort_all(&self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::{branch, BranchUsage, CacheReuse};
    use fm_value::{TaggedValue, TraceId};
    use std::time::Duration;

    fn value_branch(value: u32, delay_ms: u64) -> SharedBranch<u32> {
        branch(move |_ctx: ExecutionContext| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            Ok::<_, anyhow::Error>(TaggedValue::new(value, 0.8, "test", TraceId::new())?)
        })
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in [DispatchStrategy::FastParallel, DispatchStrategy::CacheOptimized] {
            assert_eq!(strategy.as_str().parse::<DispatchStrategy>(), Ok(strategy));
        }
        assert!("round-robin".parse::<DispatchStrategy>().is_err());
        assert_eq!(
            serde_json::to_value(DispatchStrategy::CacheOptimized).unwrap(),
            "cache-optimized"
        );
    }

    #[tokio::test]
    async fn empty_fork_is_rejected() {
        let err = ForkExecutor::new()
            .fork::<u32>(Vec::new(), DispatchStrategy::CacheOptimized, Warmup::FirstBranch)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ForkError::EmptyFork {
                strategy: DispatchStrategy::CacheOptimized
            }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn results_follow_branch_order() {
        let branches = vec![value_branch(0, 40), value_branch(1, 5), value_branch(2, 20)];
        let result = ForkExecutor::new()
            .fork(branches, DispatchStrategy::FastParallel, Warmup::None)
            .await
            .unwrap();
        let values: Vec<u32> = result.results().iter().map(|v| *v.value()).collect();
        assert_eq!(values, vec![0, 1, 2]);
        assert_eq!(result.metadata().strategy, DispatchStrategy::FastParallel);
    }

    #[tokio::test]
    async fn warmup_ignored_under_fast_parallel() {
        let result = ForkExecutor::new()
            .fork(vec![value_branch(7, 0)], DispatchStrategy::FastParallel, Warmup::FirstBranch)
            .await
            .unwrap();
        assert!(!result.cache_stats().warmup_ran);
        assert_eq!(result.metadata().warmup, WarmupKind::None);
    }

    #[tokio::test]
    async fn usage_lands_in_cache_stats() {
        let b: SharedBranch<u32> = branch(|ctx: ExecutionContext| async move {
            let value = TaggedValue::new(1u32, 0.5, "usage", TraceId::new())?;
            let usage = BranchUsage::new()
                .with_cost(0.5)
                .with_cache(ctx.warmed());
            Ok::<_, anyhow::Error>(BranchOutcome::new(value).with_usage(usage))
        });
        let result = ForkExecutor::new()
            .fork(
                vec![Arc::clone(&b), b],
                DispatchStrategy::CacheOptimized,
                Warmup::FirstBranch,
            )
            .await
            .unwrap();
        let stats = result.cache_stats();
        assert!(stats.warmup_ran);
        assert_eq!(stats.warmup_cost, 0.5);
        assert_eq!(stats.branch_cache, vec![CacheReuse::Miss, CacheReuse::Hit]);
        assert_eq!(stats.branch_costs, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn signature_count_mismatch() {
        let signature = SchemaSignature::of_sample(&serde_json::json!(1));
        let options = ForkOptions::new(DispatchStrategy::FastParallel)
            .with_signatures(vec![signature]);
        let err = ForkExecutor::new()
            .fork_with(vec![value_branch(0, 0), value_branch(1, 0)], options)
            .await
            .unwrap_err();
        assert!(matches!(err, ForkError::InvalidOptions { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn options_from_config() {
        let config = ForkConfig::default()
            .with_default_strategy(DispatchStrategy::CacheOptimized)
            .with_default_warmup(WarmupKind::FirstBranch)
            .with_schema_conflict(ConflictBehavior::Error);
        let options = ForkExecutor::with_config(config).options();
        assert_eq!(options.strategy, DispatchStrategy::CacheOptimized);
        assert_eq!(options.warmup.kind(), WarmupKind::FirstBranch);
        assert_eq!(options.on_schema_conflict, ConflictBehavior::Error);
    }
}
