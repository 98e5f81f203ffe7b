//! Fork-then-merge pipeline
//!
//! Runs branches through a [`ForkExecutor`], then reduces the ordered results
//! with a merge strategy. The fork result is kept alongside the merge so it
//! can be merged again under a different strategy.

use crate::error::Error;
use fm_fork::{ForkConfig, ForkExecutor, ForkOptions, ForkResult, SharedBranch};
use fm_merge::{MergeEngine, MergeError, MergeResult, MergeStrategy};
use fm_value::TaggedValue;

/// Fork/merge pipeline
#[derive(Debug, Clone, Default)]
pub struct ForkMerge {
    executor: ForkExecutor,
    engine: MergeEngine,
}

impl ForkMerge {
    /// Pipeline with default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipeline around an existing executor
    #[inline]
    #[must_use]
    pub fn with_executor(executor: ForkExecutor) -> Self {
        Self {
            executor,
            engine: MergeEngine::new(),
        }
    }

    /// Pipeline with fork configuration
    #[inline]
    #[must_use]
    pub fn with_config(config: ForkConfig) -> Self {
        Self::with_executor(ForkExecutor::with_config(config))
    }

    /// Underlying executor
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &ForkExecutor {
        &self.executor
    }

    /// Fork `branches` with `options`, then merge with `strategy`
    ///
    /// # Errors
    /// - [`Error::Fork`] if the fork fails; nothing is merged
    /// - [`Error::Merge`] if the strategy rejects the results
    pub async fn run<T, R, S>(
        &self,
        branches: Vec<SharedBranch<T>>,
        options: ForkOptions,
        strategy: &S,
    ) -> Result<PipelineResult<T, R>, Error>
    where
        T: Send + 'static,
        S: MergeStrategy<T, R> + ?Sized,
    {
        let fork = self.executor.fork_with(branches, options).await?;
        let merge = self.engine.merge(fork.results(), strategy)?;

        tracing::info!(
            fork_id = %fork.metadata().fork_id,
            strategy = strategy.name(),
            consensus = merge.provenance.consensus_level,
            conflicts = merge.conflicts.len(),
            "pipeline merged"
        );
        Ok(PipelineResult { fork, merge })
    }

    /// [`run`](Self::run) with options seeded from the executor's configuration
    ///
    /// # Errors
    /// See [`run`](Self::run)
    pub async fn run_default<T, R, S>(
        &self,
        branches: Vec<SharedBranch<T>>,
        strategy: &S,
    ) -> Result<PipelineResult<T, R>, Error>
    where
        T: Send + 'static,
        S: MergeStrategy<T, R> + ?Sized,
    {
        self.run(branches, self.executor.options(), strategy).await
    }
}

/// Fork result and its merge
#[derive(Debug, Clone)]
pub struct PipelineResult<T, R> {
    /// Ordered branch results with stats and metadata
    pub fork: ForkResult<T>,

    /// Merged value with provenance and conflicts
    pub merge: MergeResult<R>,
}

impl<T, R> PipelineResult<T, R> {
    /// The merged value
    #[inline]
    #[must_use]
    pub fn value(&self) -> &TaggedValue<R> {
        &self.merge.value
    }

    /// Merge the same fork results under another strategy
    ///
    /// # Errors
    /// Whatever `strategy` raises
    pub fn remerge<R2, S>(&self, strategy: &S) -> Result<MergeResult<R2>, MergeError>
    where
        S: MergeStrategy<T, R2> + ?Sized,
    {
        fm_merge::merge(self.fork.results(), strategy)
    }

    /// Drop the fork half
    #[inline]
    #[must_use]
    pub fn into_merge(self) -> MergeResult<R> {
        self.merge
    }
}
