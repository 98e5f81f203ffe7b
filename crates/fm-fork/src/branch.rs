//! Branch contract
//!
//! A branch is one independently executed unit of work. It receives an
//! [`ExecutionContext`] and produces a [`BranchOutcome`]: the tagged value plus
//! whatever usage figures the upstream call reported.

use crate::executor::ForkExecutor;
use async_trait::async_trait;
use fm_value::TaggedValue;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// One unit of forked work
///
/// Closures `Fn(ExecutionContext) -> impl Future<Output = anyhow::Result<O>>`
/// implement this trait when `O: Into<BranchOutcome<T>>`, so a branch can
/// return a bare [`TaggedValue`] or a full outcome.
///
/// Branches must not observe each other's results or timing.
#[async_trait]
pub trait Branch<T>: Send + Sync {
    /// Run the branch to completion
    ///
    /// # Errors
    /// Any failure; under fail-fast it aborts the whole fork
    async fn run(&self, ctx: ExecutionContext) -> anyhow::Result<BranchOutcome<T>>;
}

#[async_trait]
impl<T, F, Fut, O> Branch<T> for F
where
    T: Send + 'static,
    F: Fn(ExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<O>> + Send,
    O: Into<BranchOutcome<T>> + Send,
{
    async fn run(&self, ctx: ExecutionContext) -> anyhow::Result<BranchOutcome<T>> {
        (self)(ctx).await.map(Into::into)
    }
}

/// Shared, type-erased branch
pub type SharedBranch<T> = Arc<dyn Branch<T>>;

/// Erase a branch's concrete type so differently typed closures fit one list
#[inline]
#[must_use]
pub fn branch<T, B>(branch: B) -> SharedBranch<T>
where
    B: Branch<T> + 'static,
{
    Arc::new(branch)
}

/// Cache reuse reported by a branch's upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheReuse {
    /// Nothing reported
    #[default]
    Unreported,

    /// Cached prefix was reused
    Hit,

    /// Cached prefix was not reused
    Miss,

    /// Number of prompt tokens served from cache
    Tokens(u64),
}

impl CacheReuse {
    /// Whether any cached content was reused
    #[inline]
    #[must_use]
    pub fn is_hit(self) -> bool {
        match self {
            Self::Hit => true,
            Self::Tokens(n) => n > 0,
            Self::Unreported | Self::Miss => false,
        }
    }
}

impl From<bool> for CacheReuse {
    fn from(hit: bool) -> Self {
        if hit {
            Self::Hit
        } else {
            Self::Miss
        }
    }
}

/// Usage figures for one upstream call, recorded opaquely
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BranchUsage {
    /// Cost figure as reported; not interpreted
    pub cost: f64,

    /// Cache reuse as reported
    pub cache: CacheReuse,
}

impl BranchUsage {
    /// Create empty usage
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With cost figure
    #[inline]
    #[must_use]
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    /// With cache reuse
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: impl Into<CacheReuse>) -> Self {
        self.cache = cache.into();
        self
    }
}

/// What a branch hands back to the executor
#[derive(Debug, Clone, PartialEq)]
pub struct BranchOutcome<T> {
    /// The branch's result
    pub value: TaggedValue<T>,

    /// Reported usage
    pub usage: BranchUsage,
}

impl<T> BranchOutcome<T> {
    /// Outcome with unreported usage
    #[inline]
    #[must_use]
    pub fn new(value: TaggedValue<T>) -> Self {
        Self {
            value,
            usage: BranchUsage::default(),
        }
    }

    /// With usage figures
    #[inline]
    #[must_use]
    pub fn with_usage(mut self, usage: BranchUsage) -> Self {
        self.usage = usage;
        self
    }
}

impl<T> From<TaggedValue<T>> for BranchOutcome<T> {
    fn from(value: TaggedValue<T>) -> Self {
        Self::new(value)
    }
}

/// Execution handle given to every branch
///
/// Carries the fork's identity and an executor the branch can use to fork
/// nested work exactly like the top-level call.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    fork_id: Uuid,
    branch_index: usize,
    branch_count: usize,
    warmed: bool,
    executor: ForkExecutor,
}

impl ExecutionContext {
    pub(crate) fn new(
        fork_id: Uuid,
        branch_index: usize,
        branch_count: usize,
        warmed: bool,
        executor: ForkExecutor,
    ) -> Self {
        Self {
            fork_id,
            branch_index,
            branch_count,
            warmed,
            executor,
        }
    }

    /// Id of the enclosing fork
    #[inline]
    #[must_use]
    pub fn fork_id(&self) -> Uuid {
        self.fork_id
    }

    /// This branch's index
    #[inline]
    #[must_use]
    pub fn branch_index(&self) -> usize {
        self.branch_index
    }

    /// Total branches in the fork
    #[inline]
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.branch_count
    }

    /// Whether a warmup call completed before this branch started
    #[inline]
    #[must_use]
    pub fn warmed(&self) -> bool {
        self.warmed
    }

    /// Executor for nested forks
    #[inline]
    #[must_use]
    pub fn executor(&self) -> &ForkExecutor {
        &self.executor
    }
}

/// Caller-supplied priming call for explicit warmup
///
/// Its output is discarded; only the reported cost is kept.
#[async_trait]
pub trait Primer: Send + Sync {
    /// Run the priming call
    ///
    /// # Errors
    /// Any failure; it aborts the fork before dispatch
    async fn prime(&self) -> anyhow::Result<PrimerOutcome>;
}

#[async_trait]
impl<F, Fut, O> Primer for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<O>> + Send,
    O: Into<PrimerOutcome> + Send,
{
    async fn prime(&self) -> anyhow::Result<PrimerOutcome> {
        (self)().await.map(Into::into)
    }
}

/// Reported result of a priming call
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PrimerOutcome {
    /// Cost figure as reported
    pub cost: f64,
}

impl PrimerOutcome {
    /// Create outcome with cost
    #[inline]
    #[must_use]
    pub fn new(cost: f64) -> Self {
        Self { cost }
    }
}

impl From<f64> for PrimerOutcome {
    fn from(cost: f64) -> Self {
        Self::new(cost)
    }
}

impl From<()> for PrimerOutcome {
    fn from((): ()) -> Self {
        Self::default()
    }
}
