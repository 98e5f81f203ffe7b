//! Fork/Merge Value Model
//!
//! The data contract shared by every fork and merge step.
//!
//! # Core Concepts
//!
//! - [`TaggedValue<T>`]: payload + confidence + origin + trace id
//! - [`TraceId`]: audit correlation id, random or deterministically derived
//! - [`validate_confidence`]: the `[0, 1]` range check applied at every boundary
//!
//! # Example
//!
//! ```rust
//! use fm_value::{TaggedValue, TraceId};
//!
//! let vote = TaggedValue::new("urgent", 0.9, "classifier-a", TraceId::new()).unwrap();
//! assert_eq!(vote.confidence(), 0.9);
//! assert!(TaggedValue::new("urgent", 1.3, "classifier-a", TraceId::new()).is_err());
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod confidence;
mod error;
mod tagged;
mod trace;

pub use confidence::{
    is_valid_confidence, mean_confidence, validate_confidence, MAX_CONFIDENCE, MIN_CONFIDENCE,
};
pub use error::ValueError;
pub use tagged::{TaggedValue, MERGED_ORIGIN};
pub use trace::TraceId;

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
