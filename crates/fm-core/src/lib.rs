//! Fork/Merge Core
//!
//! One call that forks N branches and merges their results with full
//! provenance.
//!
//! # Core Concepts
//!
//! - [`ForkMerge`]: Fork with a [`ForkExecutor`], then merge with any [`MergeStrategy`]
//! - [`PipelineResult`]: The fork result and its merge, re-mergeable
//! - [`Error`]: Fork or merge failure, with branch index and strategy name
//!
//! # Example
//!
//! ```rust
//! use fm_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fm_core::Error> {
//! let branches: Vec<SharedBranch<&str>> = ["urgent", "normal", "urgent"]
//!     .into_iter()
//!     .zip([0.9, 0.4, 0.3])
//!     .map(|(label, confidence)| {
//!         branch(move |ctx: ExecutionContext| async move {
//!             let origin = format!("classifier-{}", ctx.branch_index());
//!             Ok::<_, anyhow::Error>(TaggedValue::new(label, confidence, origin, TraceId::new())?)
//!         })
//!     })
//!     .collect();
//!
//! let options = ForkOptions::new(DispatchStrategy::CacheOptimized).with_warmup(Warmup::FirstBranch);
//! let result = ForkMerge::new().run(branches, options, &WeightedVote::new()).await?;
//!
//! assert_eq!(*result.value().value(), "urgent");
//! assert_eq!(result.merge.provenance.contributing_branches, vec![0, 2]);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod error;
mod pipeline;

pub use error::{Error, Result};
pub use pipeline::{ForkMerge, PipelineResult};

pub use fm_fork::{ForkConfig, ForkExecutor, ForkOptions, ForkResult};
pub use fm_merge::{MergeResult, MergeStrategy};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for forking and merging
    pub use crate::{Error, ForkMerge, PipelineResult};
    pub use fm_fork::{
        branch, Branch, BranchOutcome, BranchUsage, CacheReuse, ConflictBehavior,
        DispatchStrategy, ExecutionContext, ForkConfig, ForkError, ForkExecutor, ForkOptions,
        ForkResult, SchemaSignature, SharedBranch, Warmup,
    };
    pub use fm_merge::{
        merge, Concat, Custom, Fieldwise, MergeError, MergeResult, MergeStrategy, OnFailure,
        RequireConsensus, StrategyExt, StrategyRegistry, StrategySpec, WeightedAverage,
        WeightedVote,
    };
    pub use fm_value::{TaggedValue, TraceId};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
