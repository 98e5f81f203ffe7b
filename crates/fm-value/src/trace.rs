//! Trace identifiers for audit correlation
//!
//! Provides [`TraceId`], the opaque identifier stamped on every
//! [`TaggedValue`](crate::TaggedValue) so fork and merge steps can be
//! correlated from logs after the fact.

use std::fmt::{self, Display, Formatter};

/// Prefix carried by identifiers derived from other identifiers
const DERIVED_PREFIX: &str = "derived-";

/// Unique identifier for audit correlation
///
/// Fresh identifiers are random (UUID v4). Identifiers for merged values are
/// derived deterministically from their inputs so repeated merges of the same
/// results produce identical output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct TraceId(String);

impl TraceId {
    /// Create a fresh random trace id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wrap an externally supplied identifier
    #[inline]
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a deterministic id from a label and parent ids
    ///
    /// The same label and parents, in the same order, always yield the same id.
    #[must_use]
    pub fn derive<'a, I>(label: &str, parents: I) -> Self
    where
        I: IntoIterator<Item = &'a TraceId>,
    {
        let mut hasher = blake3::Hasher::new();
        hasher.update(label.as_bytes());
        for parent in parents {
            hasher.update(&[0]);
            hasher.update(parent.0.as_bytes());
        }
        let hash = hasher.finalize();
        Self(format!("{DERIVED_PREFIX}{}", hex::encode(&hash.as_bytes()[..16])))
    }

    /// Check whether this id was produced by [`TraceId::derive`]
    #[inline]
    #[must_use]
    pub fn is_derived(&self) -> bool {
        self.0.starts_with(DERIVED_PREFIX)
    }

    /// Borrow the identifier text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TraceId {
    fn from(id: &str) -> Self {
        Self::from_string(id)
    }
}

impl From<String> for TraceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(TraceId::new(), TraceId::new());
    }

    #[test]
    fn derive_is_deterministic() {
        let parents = [TraceId::from("a"), TraceId::from("b")];
        let first = TraceId::derive("weighted-vote", &parents);
        let second = TraceId::derive("weighted-vote", &parents);
        assert_eq!(first, second);
        assert!(first.is_derived());
    }

    #[test]
    fn derive_depends_on_order_and_label() {
        let ab = [TraceId::from("a"), TraceId::from("b")];
        let ba = [TraceId::from("b"), TraceId::from("a")];
        assert_ne!(TraceId::derive("x", &ab), TraceId::derive("x", &ba));
        assert_ne!(TraceId::derive("x", &ab), TraceId::derive("y", &ab));
    }

    #[test]
    fn derive_separates_parent_boundaries() {
        let joined = [TraceId::from("ab")];
        let split = [TraceId::from("a"), TraceId::from("b")];
        assert_ne!(TraceId::derive("x", &joined), TraceId::derive("x", &split));
    }
}
