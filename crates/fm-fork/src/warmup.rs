//! Warmup scheduling
//!
//! Decides whether a priming call runs before the fan-out, runs it, and
//! reports its cost. Whichever mode runs a call, it completes before any
//! fan-out branch starts.

use crate::branch::{BranchOutcome, ExecutionContext, Primer, SharedBranch};
use crate::error::ForkError;
use crate::executor::{accept_outcome, join_failure, AbortOnDrop, DispatchStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Warmup mode, without the primer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WarmupKind {
    /// No priming call
    #[default]
    None,

    /// Branch 0 runs to completion first and doubles as the priming call
    FirstBranch,

    /// A separate primer runs first; its output is discarded
    Explicit,
}

impl WarmupKind {
    /// Stable name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::FirstBranch => "first-branch",
            Self::Explicit => "explicit",
        }
    }
}

impl fmt::Display for WarmupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Warmup request
#[derive(Clone, Default)]
pub enum Warmup {
    /// No priming call
    #[default]
    None,

    /// Branch 0 primes the cache
    FirstBranch,

    /// A caller-supplied primer primes the cache
    Explicit(Arc<dyn Primer>),
}

impl Warmup {
    /// Explicit warmup with a primer
    #[must_use]
    pub fn explicit<P: Primer + 'static>(primer: P) -> Self {
        Self::Explicit(Arc::new(primer))
    }

    /// Mode without the primer
    #[inline]
    #[must_use]
    pub fn kind(&self) -> WarmupKind {
        match self {
            Self::None => WarmupKind::None,
            Self::FirstBranch => WarmupKind::FirstBranch,
            Self::Explicit(_) => WarmupKind::Explicit,
        }
    }
}

impl fmt::Debug for Warmup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind().as_str())
    }
}

/// Whether a priming call ran, and what it cost
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WarmupReport {
    /// A priming call completed
    pub ran: bool,

    /// Reported cost of the priming call; `0.0` when none ran
    pub cost: f64,
}

/// Outcome of the warmup phase
#[derive(Debug)]
pub struct WarmupPhase<T> {
    /// What ran
    pub report: WarmupReport,

    /// Branch 0's outcome under first-branch warmup
    pub first_branch: Option<BranchOutcome<T>>,
}

impl<T> WarmupPhase<T> {
    fn skipped() -> Self {
        Self {
            report: WarmupReport::default(),
            first_branch: None,
        }
    }
}

/// Runs the warmup phase of a fork
#[derive(Debug, Clone, Copy, Default)]
pub struct WarmupScheduler {
    strategy: DispatchStrategy,
}

impl WarmupScheduler {
    /// Scheduler reporting errors under `strategy`
    #[inline]
    #[must_use]
    pub fn new(strategy: DispatchStrategy) -> Self {
        Self { strategy }
    }

    /// Run the priming call for `warmup`, if any, to completion
    ///
    /// `ctx` is the context branch 0 runs with under first-branch warmup.
    ///
    /// # Errors
    /// - [`ForkError::Warmup`] if the primer fails
    /// - branch errors for branch 0 under first-branch warmup
    pub async fn schedule<T>(
        &self,
        warmup: &Warmup,
        branches: &[SharedBranch<T>],
        ctx: ExecutionContext,
    ) -> Result<WarmupPhase<T>, ForkError>
    where
        T: Send + 'static,
    {
        match warmup {
            Warmup::None => Ok(WarmupPhase::skipped()),

            Warmup::FirstBranch => {
                let Some(first) = branches.first() else {
                    return Ok(WarmupPhase::skipped());
                };
                let first = Arc::clone(first);

                let handle = tokio::spawn(async move { first.run(ctx).await });
                // Dropping the fork mid-warmup aborts branch 0.
                let mut guard = AbortOnDrop::with_capacity(1);
                guard.track(handle.abort_handle());
                let outcome = match handle.await {
                    Ok(Ok(outcome)) => accept_outcome(0, self.strategy, outcome)?,
                    Ok(Err(source)) => {
                        tracing::error!(branch = 0, error = %source, "warmup branch failed");
                        return Err(ForkError::Branch {
                            index: 0,
                            strategy: self.strategy,
                            source,
                        });
                    }
                    Err(err) => return Err(join_failure(0, self.strategy, err)),
                };

                let cost = outcome.usage.cost;
                tracing::debug!(mode = "first-branch", cost, "warmup completed");
                Ok(WarmupPhase {
                    report: WarmupReport { ran: true, cost },
                    first_branch: Some(outcome),
                })
            }

            Warmup::Explicit(primer) => {
                let outcome = primer.prime().await.map_err(|source| {
                    tracing::error!(error = %source, "warmup primer failed");
                    ForkError::Warmup {
                        strategy: self.strategy,
                        source,
                    }
                })?;

                tracing::debug!(mode = "explicit", cost = outcome.cost, "warmup completed");
                Ok(WarmupPhase {
                    report: WarmupReport {
                        ran: true,
                        cost: outcome.cost,
                    },
                    first_branch: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::{branch, BranchUsage};
    use crate::executor::ForkExecutor;
    use fm_value::{TaggedValue, TraceId};
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Uuid::new_v4(), 0, 2, false, ForkExecutor::new())
    }

    fn costly(cost: f64) -> SharedBranch<u8> {
        branch(move |ctx: ExecutionContext| async move {
            let value = TaggedValue::new(ctx.branch_index() as u8, 0.5, "costly", TraceId::new())?;
            Ok::<_, anyhow::Error>(
                BranchOutcome::new(value).with_usage(BranchUsage::new().with_cost(cost)),
            )
        })
    }

    #[test]
    fn kind_names() {
        assert_eq!(WarmupKind::FirstBranch.to_string(), "first-branch");
        assert_eq!(
            serde_json::to_value(WarmupKind::Explicit).unwrap(),
            "explicit"
        );
        assert_eq!(Warmup::default().kind(), WarmupKind::None);
    }

    #[tokio::test]
    async fn none_is_noop() {
        let phase = WarmupScheduler::default()
            .schedule(&Warmup::None, &[costly(1.0)], ctx())
            .await
            .unwrap();
        assert_eq!(phase.report, WarmupReport::default());
        assert!(phase.first_branch.is_none());
    }

    #[tokio::test]
    async fn first_branch_keeps_result_and_cost() {
        let phase = WarmupScheduler::default()
            .schedule(&Warmup::FirstBranch, &[costly(0.4), costly(9.0)], ctx())
            .await
            .unwrap();
        assert!(phase.report.ran);
        assert_eq!(phase.report.cost, 0.4);
        assert_eq!(*phase.first_branch.unwrap().value.value(), 0);
    }

    #[tokio::test]
    async fn explicit_discards_output() {
        let warmup = Warmup::explicit(|| async { Ok::<_, anyhow::Error>(0.125) });
        let phase = WarmupScheduler::default()
            .schedule(&warmup, &[costly(1.0)], ctx())
            .await
            .unwrap();
        assert_eq!(phase.report, WarmupReport { ran: true, cost: 0.125 });
        assert!(phase.first_branch.is_none());
    }

    #[tokio::test]
    async fn primer_failure_aborts() {
        let warmup = Warmup::explicit(|| async {
            Err::<f64, _>(anyhow::anyhow!("cache endpoint down"))
        });
        let err = WarmupScheduler::new(DispatchStrategy::CacheOptimized)
            .schedule(&warmup, &[costly(1.0)], ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ForkError::Warmup { .. }));
        assert!(err.to_string().contains("cache endpoint down"));
    }
}
