//! Error types for tagged values

/// Errors raised while constructing or validating tagged values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// Confidence is `NaN`, infinite, or outside `[0, 1]`
    #[error("confidence {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        /// The offending value
        value: f64,
    },

    /// Origin tag is empty
    #[error("origin tag cannot be empty")]
    EmptyOrigin,
}
