//! Strategy registry
//!
//! Provides [`StrategyRegistry`] for selecting JSON merge strategies by name,
//! and [`StrategySpec`] for describing them declaratively in config files.

use crate::consensus::{OnFailure, RequireConsensus};
use crate::fieldwise::Fieldwise;
use crate::json::StrategyExt;
use crate::strategy::{DynStrategy, MergeError, MergeStrategy};
use crate::{Concat, WeightedAverage, WeightedVote};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared strategy over JSON values
pub type SharedStrategy = Arc<dyn MergeStrategy<Value, Value>>;

/// Registry of named JSON merge strategies
///
/// Strategies are stored as shared trait objects, so one registered instance
/// serves every lookup.
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, SharedStrategy>,
}

impl StrategyRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Create registry with built-in strategies
    ///
    /// - `weighted-vote`
    /// - `weighted-average`
    /// - `concat`, `concat-dedupe`
    /// - `fieldwise` (weighted vote on every field)
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(WeightedVote::NAME, WeightedVote::new());
        registry.register(WeightedAverage::NAME, WeightedAverage::new().into_json::<f64>());
        registry.register(Concat::NAME, Concat::new());
        registry.register("concat-dedupe", Concat::new().deduplicated());
        registry.register(
            Fieldwise::NAME,
            Fieldwise::new().with_default(WeightedVote::new()),
        );
        registry
    }

    /// Register a strategy under `name`, replacing any previous entry
    pub fn register<S>(&mut self, name: &str, strategy: S)
    where
        S: MergeStrategy<Value, Value> + 'static,
    {
        self.strategies.insert(name.to_string(), Arc::new(strategy));
    }

    /// Look up a strategy
    ///
    /// # Errors
    /// [`MergeError::UnknownStrategy`] if nothing is registered under `name`
    pub fn get(&self, name: &str) -> Result<SharedStrategy, MergeError> {
        self.strategies
            .get(name)
            .cloned()
            .ok_or_else(|| MergeError::UnknownStrategy {
                name: name.to_string(),
            })
    }

    /// Check if strategy exists
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// Remove strategy
    #[inline]
    pub fn remove(&mut self, name: &str) -> bool {
        self.strategies.remove(name).is_some()
    }

    /// List all registered strategy names, sorted
    #[inline]
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.keys().map(String::as_str).collect()
    }

    /// Get number of registered strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Build a strategy from its declarative description
    ///
    /// `named` entries resolve against this registry.
    ///
    /// # Errors
    /// - [`MergeError::UnknownStrategy`] for an unregistered `named` entry
    /// - [`MergeError::InvalidConfig`] for out-of-range parameters
    pub fn build(&self, spec: &StrategySpec) -> Result<DynStrategy, MergeError> {
        let strategy: DynStrategy = match spec {
            StrategySpec::WeightedVote => WeightedVote::new().boxed(),

            StrategySpec::WeightedAverage {
                outlier_threshold,
                tolerance,
            } => {
                let mut average = WeightedAverage::new();
                if let Some(k) = outlier_threshold {
                    if !(k.is_finite() && *k > 0.0) {
                        return Err(invalid(
                            WeightedAverage::NAME,
                            format!("outlier threshold must be a positive number, got {k}"),
                        ));
                    }
                    average = average.with_outlier_threshold(*k);
                }
                if let Some(tolerance) = tolerance {
                    if !(tolerance.is_finite() && *tolerance >= 0.0) {
                        return Err(invalid(
                            WeightedAverage::NAME,
                            format!("tolerance must be a non-negative number, got {tolerance}"),
                        ));
                    }
                    average = average.with_tolerance(*tolerance);
                }
                average.into_json::<f64>().boxed()
            }

            StrategySpec::Concat { dedupe, max_items } => {
                let mut concat = Concat::new();
                if *dedupe {
                    concat = concat.deduplicated();
                }
                if let Some(max) = max_items {
                    concat = concat.with_max_items(*max);
                }
                concat.boxed()
            }

            StrategySpec::Fieldwise { fields, default } => {
                let mut fieldwise = Fieldwise::new();
                for (field, spec) in fields {
                    fieldwise = fieldwise.field_boxed(field.clone(), self.build(spec)?);
                }
                if let Some(default) = default {
                    fieldwise = fieldwise.with_default_boxed(self.build(default)?);
                }
                fieldwise.boxed()
            }

            StrategySpec::RequireConsensus {
                inner,
                min_agreeing,
                fallback,
            } => {
                if *min_agreeing == 0 {
                    return Err(invalid(
                        RequireConsensus::<DynStrategy, Value>::NAME,
                        "min_agreeing must be at least 1".to_string(),
                    ));
                }
                let on_failure = match fallback {
                    Some(value) => OnFailure::Fallback(value.clone()),
                    None => OnFailure::Error,
                };
                RequireConsensus::new(self.build(inner)?, *min_agreeing)
                    .on_failure(on_failure)
                    .boxed()
            }

            StrategySpec::Named { name } => Box::new(self.get(name)?),
        };

        tracing::debug!(strategy = strategy.name(), "built merge strategy");
        Ok(strategy)
    }
}

fn invalid(strategy: &str, reason: String) -> MergeError {
    MergeError::InvalidConfig {
        strategy: strategy.to_string(),
        reason,
    }
}

/// Declarative strategy description
///
/// # Example (TOML)
///
/// ```toml
/// kind = "fieldwise"
///
/// [fields.priority]
/// kind = "weighted-vote"
///
/// [fields.estimate]
/// kind = "weighted-average"
/// outlier_threshold = 2.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StrategySpec {
    /// Confidence-weighted vote
    WeightedVote,

    /// Confidence-weighted average
    WeightedAverage {
        /// Outlier rejection threshold in standard deviations
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outlier_threshold: Option<f64>,

        /// Agreement tolerance
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tolerance: Option<f64>,
    },

    /// List concatenation
    Concat {
        /// Fold duplicate items
        #[serde(default)]
        dedupe: bool,

        /// Keep at most this many items
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_items: Option<usize>,
    },

    /// Per-field object merge
    Fieldwise {
        /// Strategy per field
        #[serde(default)]
        fields: BTreeMap<String, StrategySpec>,

        /// Strategy for fields not listed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Box<StrategySpec>>,
    },

    /// k-of-n consensus gate around another strategy
    RequireConsensus {
        /// Wrapped strategy
        inner: Box<StrategySpec>,

        /// Branches that must agree
        min_agreeing: usize,

        /// Value returned (confidence 0) when the gate fails; absent means error
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fallback: Option<Value>,
    },

    /// Strategy registered by name
    Named {
        /// Registry name
        name: String,
    },
}

impl StrategySpec {
    /// Shorthand for a registry lookup
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named { name: name.into() }
    }
}
