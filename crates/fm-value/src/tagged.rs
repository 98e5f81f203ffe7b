//! The tagged value container
//!
//! [`TaggedValue<T>`] is the unit every branch produces and every merge
//! strategy consumes: a payload plus its confidence, origin tag, and trace id.

use crate::confidence::validate_confidence;
use crate::error::ValueError;
use crate::trace::TraceId;
use serde::{Deserialize, Serialize};

/// Origin tag stamped on every merged value
pub const MERGED_ORIGIN: &str = "merged";

/// A payload tagged with confidence, origin and trace id
///
/// Construction through [`TaggedValue::new`] validates the confidence range.
/// Values arriving from deserialization or [`TaggedValue::new_unchecked`] are
/// not validated here; the merge engine re-checks every input at its boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaggedValue<T> {
    value: T,
    confidence: f64,
    origin: String,
    trace_id: TraceId,
}

impl<T> TaggedValue<T> {
    /// Create a tagged value
    ///
    /// # Errors
    /// - [`ValueError::ConfidenceOutOfRange`] if `confidence` is not in `[0, 1]`
    /// - [`ValueError::EmptyOrigin`] if `origin` is empty
    pub fn new(
        value: T,
        confidence: f64,
        origin: impl Into<String>,
        trace_id: TraceId,
    ) -> Result<Self, ValueError> {
        let origin = origin.into();
        if origin.is_empty() {
            return Err(ValueError::EmptyOrigin);
        }
        Ok(Self {
            value,
            confidence: validate_confidence(confidence)?,
            origin,
            trace_id,
        })
    }

    /// Create a tagged value without validating the confidence
    ///
    /// Intended for adapters that forward values produced elsewhere.
    #[inline]
    #[must_use]
    pub fn new_unchecked(
        value: T,
        confidence: f64,
        origin: impl Into<String>,
        trace_id: TraceId,
    ) -> Self {
        Self {
            value,
            confidence,
            origin: origin.into(),
            trace_id,
        }
    }

    /// Create a merged value stamped with [`MERGED_ORIGIN`]
    ///
    /// # Errors
    /// Returns [`ValueError::ConfidenceOutOfRange`] if `confidence` is not in `[0, 1]`
    pub fn merged(value: T, confidence: f64, trace_id: TraceId) -> Result<Self, ValueError> {
        Self::new(value, confidence, MERGED_ORIGIN, trace_id)
    }

    /// Borrow the payload
    #[inline]
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Confidence in `[0, 1]`
    #[inline]
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Origin tag
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Trace id
    #[inline]
    #[must_use]
    pub fn trace_id(&self) -> &TraceId {
        &self.trace_id
    }

    /// Whether this value was produced by a merge
    #[inline]
    #[must_use]
    pub fn is_merged(&self) -> bool {
        self.origin == MERGED_ORIGIN
    }

    /// Consume and return the payload
    #[inline]
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    /// Transform the payload, keeping confidence, origin and trace id
    #[must_use]
    pub fn map<U, F>(self, f: F) -> TaggedValue<U>
    where
        F: FnOnce(T) -> U,
    {
        TaggedValue {
            value: f(self.value),
            confidence: self.confidence,
            origin: self.origin,
            trace_id: self.trace_id,
        }
    }

    /// Re-check the confidence range
    ///
    /// # Errors
    /// Returns [`ValueError::ConfidenceOutOfRange`] if the stored confidence is invalid
    #[inline]
    pub fn validate(&self) -> Result<(), ValueError> {
        validate_confidence(self.confidence).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_validates_confidence() {
        assert!(TaggedValue::new("x", 0.5, "branch-0", TraceId::new()).is_ok());
        let err = TaggedValue::new("x", 1.5, "branch-0", TraceId::new()).unwrap_err();
        assert_eq!(err, ValueError::ConfidenceOutOfRange { value: 1.5 });
    }

    #[test]
    fn new_rejects_empty_origin() {
        let err = TaggedValue::new("x", 0.5, "", TraceId::new()).unwrap_err();
        assert_eq!(err, ValueError::EmptyOrigin);
    }

    #[test]
    fn merged_uses_sentinel_origin() {
        let v = TaggedValue::merged(3, 0.7, TraceId::from("t")).unwrap();
        assert_eq!(v.origin(), MERGED_ORIGIN);
        assert!(v.is_merged());
    }

    #[test]
    fn unchecked_values_fail_validation() {
        let v = TaggedValue::new_unchecked("x", f64::NAN, "branch-0", TraceId::new());
        assert!(v.validate().is_err());
    }

    #[test]
    fn map_keeps_tags() {
        let v = TaggedValue::new(2, 0.4, "branch-1", TraceId::from("t1")).unwrap();
        let mapped = v.map(|n| n * 10);
        assert_eq!(*mapped.value(), 20);
        assert_eq!(mapped.confidence(), 0.4);
        assert_eq!(mapped.origin(), "branch-1");
        assert_eq!(mapped.trace_id().as_str(), "t1");
    }

    #[test]
    fn serde_shape() {
        let v = TaggedValue::new("urgent", 0.9, "classifier", TraceId::from("t")).unwrap();
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["value"], "urgent");
        assert_eq!(json["confidence"], 0.9);
        assert_eq!(json["origin"], "classifier");
        assert_eq!(json["trace_id"], "t");

        let back: TaggedValue<String> = serde_json::from_value(json).unwrap();
        assert_eq!(back.value(), "urgent");
    }
}
