//! Schema signatures and conflict detection
//!
//! A [`SchemaSignature`] is a deterministic fingerprint of a branch's expected
//! output shape. Branches with different signatures are neither cache- nor
//! merge-compatible; [`detect_conflict`] groups them and
//! [`handle_schema_conflict`] applies the caller's chosen severity.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Schema keywords that carry documentation, not structure
const ANNOTATION_KEYS: [&str; 5] = ["$schema", "title", "description", "examples", "$comment"];

/// Schema keywords whose values map names to subschemas
const SCHEMA_MAP_KEYS: [&str; 5] = [
    "properties",
    "patternProperties",
    "definitions",
    "$defs",
    "dependentSchemas",
];

/// Schema keywords whose array values are order-insensitive sets
const SET_KEYS: [&str; 3] = ["required", "type", "enum"];

/// Structural fingerprint of an output shape
///
/// Equality is independent of property declaration order and of annotations
/// such as `title` or `description`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaSignature(#[serde(with = "hex_bytes")] [u8; 32]);

impl SchemaSignature {
    /// Fingerprint a JSON-schema document
    #[must_use]
    pub fn from_schema(schema: &Value) -> Self {
        let canonical = canonicalize(schema, false);
        Self(*blake3::hash(canonical.to_string().as_bytes()).as_bytes())
    }

    /// Fingerprint the shape inferred from a sample value
    #[must_use]
    pub fn of_sample(sample: &Value) -> Self {
        Self::from_schema(&infer_shape(sample))
    }

    /// Fingerprint a Rust type's JSON schema
    ///
    /// # Errors
    /// Returns an error if the generated schema cannot be converted to JSON
    pub fn of<T: JsonSchema>() -> Result<Self, serde_json::Error> {
        let schema = serde_json::to_value(schemars::schema_for!(T))?;
        Ok(Self::from_schema(&schema))
    }

    /// Raw fingerprint bytes
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Full hex form
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SchemaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for SchemaSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaSignature({self})")
    }
}

mod hex_bytes {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&text, &mut bytes).map_err(D::Error::custom)?;
        Ok(bytes)
    }
}

/// Canonical form: annotations dropped, object keys and set-like arrays sorted
fn canonicalize(value: &Value, in_schema_map: bool) -> Value {
    match value {
        Value::Object(object) if in_schema_map => Value::Object(
            sorted_entries(object)
                .map(|(name, schema)| (name.clone(), canonicalize(schema, false)))
                .collect(),
        ),
        Value::Object(object) => {
            let mut out = Map::new();
            for (key, value) in sorted_entries(object) {
                if ANNOTATION_KEYS.contains(&key.as_str()) {
                    continue;
                }
                let canonical = if SCHEMA_MAP_KEYS.contains(&key.as_str()) {
                    canonicalize(value, true)
                } else if SET_KEYS.contains(&key.as_str()) {
                    sorted_set(value)
                } else {
                    canonicalize(value, false)
                };
                out.insert(key.clone(), canonical);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| canonicalize(v, false)).collect()),
        other => other.clone(),
    }
}

/// Entries in key order, whatever order the map iterates in
fn sorted_entries(object: &Map<String, Value>) -> impl Iterator<Item = (&String, &Value)> {
    let mut entries: Vec<_> = object.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries.into_iter()
}

fn sorted_set(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(|v| canonicalize(v, false)).collect();
            items.sort_by_cached_key(Value::to_string);
            items.dedup();
            Value::Array(items)
        }
        other => canonicalize(other, false),
    }
}

/// Minimal JSON schema describing a sample value's shape
fn infer_shape(sample: &Value) -> Value {
    match sample {
        Value::Null => serde_json::json!({"type": "null"}),
        Value::Bool(_) => serde_json::json!({"type": "boolean"}),
        Value::Number(n) if n.is_i64() || n.is_u64() => serde_json::json!({"type": "integer"}),
        Value::Number(_) => serde_json::json!({"type": "number"}),
        Value::String(_) => serde_json::json!({"type": "string"}),
        Value::Array(items) => {
            let mut shapes: Vec<Value> = items
                .iter()
                .map(|item| canonicalize(&infer_shape(item), false))
                .collect();
            shapes.sort_by_cached_key(Value::to_string);
            shapes.dedup();
            match shapes.len() {
                0 => serde_json::json!({"type": "array"}),
                1 => serde_json::json!({"type": "array", "items": shapes.remove(0)}),
                _ => serde_json::json!({"type": "array", "items": {"anyOf": shapes}}),
            }
        }
        Value::Object(object) => {
            let properties: Map<String, Value> = sorted_entries(object)
                .map(|(k, v)| (k.clone(), infer_shape(v)))
                .collect();
            let required: Vec<&String> = object.keys().collect();
            serde_json::json!({"type": "object", "properties": properties, "required": required})
        }
    }
}

/// Schema conflict severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictBehavior {
    /// Proceed silently
    Ignore,

    /// Proceed and log a warning
    #[default]
    Warn,

    /// Abort the fork before dispatch
    Error,
}

/// Result of comparing branch signatures
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictReport {
    /// More than one distinct signature
    pub has_conflict: bool,

    /// Signatures grouped by equality, in first-seen order
    pub groups: Vec<Vec<SchemaSignature>>,

    /// Branch indices per group, parallel to `groups`
    pub branch_groups: Vec<Vec<usize>>,
}

impl ConflictReport {
    /// Number of distinct shapes
    #[inline]
    #[must_use]
    pub fn distinct_shapes(&self) -> usize {
        self.groups.len()
    }
}

/// Group branch signatures by structural equality
#[must_use]
pub fn detect_conflict(signatures: &[SchemaSignature]) -> ConflictReport {
    let mut groups: Vec<Vec<SchemaSignature>> = Vec::new();
    let mut branch_groups: Vec<Vec<usize>> = Vec::new();

    for (branch, signature) in signatures.iter().enumerate() {
        match groups.iter().position(|g| g[0] == *signature) {
            Some(i) => {
                groups[i].push(*signature);
                branch_groups[i].push(branch);
            }
            None => {
                groups.push(vec![*signature]);
                branch_groups.push(vec![branch]);
            }
        }
    }

    ConflictReport {
        has_conflict: groups.len() > 1,
        groups,
        branch_groups,
    }
}

/// Branch output schemas diverged
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("schema conflict: {} distinct output shapes across branch groups {:?}", report.distinct_shapes(), report.branch_groups)]
pub struct SchemaConflictError {
    /// The offending report
    pub report: ConflictReport,
}

/// Apply the chosen severity to a conflict report
///
/// # Errors
/// [`SchemaConflictError`] when `behavior` is [`ConflictBehavior::Error`] and
/// the report has a conflict
pub fn handle_schema_conflict(
    report: &ConflictReport,
    behavior: ConflictBehavior,
) -> Result<(), SchemaConflictError> {
    if !report.has_conflict {
        return Ok(());
    }

    match behavior {
        ConflictBehavior::Ignore => Ok(()),
        ConflictBehavior::Warn => {
            tracing::warn!(
                shapes = report.distinct_shapes(),
                groups = ?report.branch_groups,
                "branches have divergent output schemas; cache reuse and merging may suffer"
            );
            Ok(())
        }
        ConflictBehavior::Error => Err(SchemaConflictError {
            report: report.clone(),
        }),
    }
}
