//! Fork/Merge Execution
//!
//! Concurrent branch execution with cache-aware warmup and schema conflict
//! detection.
//!
//! # Core Concepts
//!
//! - [`Branch`]: One unit of forked work; closures implement it
//! - [`ForkExecutor`]: Runs N branches concurrently, fail-fast, order-preserving
//! - [`DispatchStrategy`]: `fast-parallel` or `cache-optimized`
//! - [`Warmup`]: Optional priming call that completes before the fan-out
//! - [`SchemaSignature`]: Structural fingerprint of a branch's output shape
//! - [`ForkResult`]: Ordered results plus cache stats and metadata
//! - [`WarmupEstimate`]: Advisory cost model for deciding on warmup
//!
//! # Example
//!
//! ```rust
//! use fm_fork::{branch, DispatchStrategy, ExecutionContext, ForkExecutor, SharedBranch, Warmup};
//! use fm_value::{TaggedValue, TraceId};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), fm_fork::ForkError> {
//! let branches: Vec<SharedBranch<u32>> = (0..3u32)
//!     .map(|i| {
//!         branch(move |_ctx: ExecutionContext| async move {
//!             Ok::<_, anyhow::Error>(TaggedValue::new(i * 10, 0.8, "worker", TraceId::new())?)
//!         })
//!     })
//!     .collect();
//!
//! let result = ForkExecutor::new()
//!     .fork(branches, DispatchStrategy::CacheOptimized, Warmup::FirstBranch)
//!     .await?;
//!
//! let values: Vec<u32> = result.results().iter().map(|v| *v.value()).collect();
//! assert_eq!(values, vec![0, 10, 20]);
//! assert!(result.cache_stats().warmup_ran);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

// Contract
mod branch;
mod error;
mod result;

// Execution
mod executor;
mod warmup;

// Checks and advice
mod cost;
mod schema;

// Configuration
mod config;

// Re-exports
pub use branch::{
    branch, Branch, BranchOutcome, BranchUsage, CacheReuse, ExecutionContext, Primer,
    PrimerOutcome, SharedBranch,
};
pub use config::ForkConfig;
pub use cost::{
    estimate_savings, estimate_warmup_cost, should_warmup, WarmupCostConfig, WarmupEstimate,
};
pub use error::{ConfigError, ForkError};
pub use executor::{DispatchStrategy, ForkExecutor, ForkOptions, UnknownDispatchStrategy};
pub use result::{CacheStats, ForkMetadata, ForkResult};
pub use schema::{
    detect_conflict, handle_schema_conflict, ConflictBehavior, ConflictReport,
    SchemaConflictError, SchemaSignature,
};
pub use warmup::{Warmup, WarmupKind, WarmupPhase, WarmupReport, WarmupScheduler};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
