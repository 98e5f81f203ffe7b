//! Fork/Merge Aggregation
//!
//! Pluggable strategies reducing N branch results into one merged result with
//! provenance and an explicit conflict log.
//!
//! # Core Concepts
//!
//! - [`MergeStrategy`]: Core trait every strategy implements
//! - [`merge`]: Typed entry point guarding input and output contracts
//! - [`WeightedVote`]: Categorical merge by total confidence
//! - [`WeightedAverage`]: Continuous merge with optional outlier rejection
//! - [`Fieldwise`]: Object merge with a strategy per field
//! - [`Concat`]: List merge with optional dedupe and cap
//! - [`Custom`]: Caller-supplied reduce function
//! - [`RequireConsensus`]: k-of-n agreement gate around another strategy
//! - [`StrategyRegistry`]: Name-based selection for JSON strategies
//!
//! # Example
//!
//! ```rust
//! use fm_merge::{merge, WeightedVote};
//! use fm_value::{TaggedValue, TraceId};
//!
//! let results = vec![
//!     TaggedValue::new("urgent", 0.9, "a", TraceId::new()).unwrap(),
//!     TaggedValue::new("normal", 0.4, "b", TraceId::new()).unwrap(),
//!     TaggedValue::new("urgent", 0.3, "c", TraceId::new()).unwrap(),
//! ];
//!
//! let merged = merge(&results, &WeightedVote::new()).unwrap();
//! assert_eq!(*merged.value.value(), "urgent");
//! assert!((merged.provenance.consensus_level - 0.75).abs() < 1e-9);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

// Contract and dispatch
mod engine;
mod strategy;

// Strategy implementations
mod average;
mod concat;
mod consensus;
mod custom;
mod fieldwise;
mod vote;

// Adapters and selection
mod json;
mod registry;

// Re-exports
pub use average::{AsNumber, WeightedAverage, DEFAULT_TOLERANCE};
pub use concat::Concat;
pub use consensus::{OnFailure, RequireConsensus};
pub use custom::Custom;
pub use engine::{merge, MergeEngine};
pub use fieldwise::Fieldwise;
pub use json::{Json, StrategyExt};
pub use registry::{SharedStrategy, StrategyRegistry, StrategySpec};
pub use strategy::{
    structural_eq, DynStrategy, MergeConflict, MergeError, MergeProvenance, MergeResult,
    MergeStrategy, RejectedValue, Resolution,
};
pub use vote::WeightedVote;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
