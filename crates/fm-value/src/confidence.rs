//! Confidence range validation
//!
//! Confidence is a plain `f64` in `[0, 1]`. Values outside the range are
//! rejected, never clamped, so a faulty producer stays visible.

use crate::error::ValueError;

/// Lowest admissible confidence
pub const MIN_CONFIDENCE: f64 = 0.0;

/// Highest admissible confidence
pub const MAX_CONFIDENCE: f64 = 1.0;

/// Check whether a confidence value is finite and within `[0, 1]`
#[inline]
#[must_use]
pub fn is_valid_confidence(value: f64) -> bool {
    (MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&value)
}

/// Validate a confidence value
///
/// # Errors
/// Returns [`ValueError::ConfidenceOutOfRange`] for `NaN`, infinities and
/// anything outside `[0, 1]`.
#[inline]
pub fn validate_confidence(value: f64) -> Result<f64, ValueError> {
    if is_valid_confidence(value) {
        Ok(value)
    } else {
        Err(ValueError::ConfidenceOutOfRange { value })
    }
}

/// Arithmetic mean of a set of confidences, `None` when empty
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_confidence<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), c| (sum + c, count + 1));
    (count > 0).then(|| sum / count as f64)
}
