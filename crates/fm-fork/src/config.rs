//! Fork configuration
//!
//! Loaded from TOML; every field is optional.
//!
//! ```toml
//! default_strategy = "cache-optimized"
//! default_warmup = "first-branch"
//! on_schema_conflict = "error"
//!
//! [warmup_cost]
//! prefix_tokens = 4096
//! branch_count = 4
//! ```

use crate::cost::WarmupCostConfig;
use crate::error::ConfigError;
use crate::executor::DispatchStrategy;
use crate::schema::ConflictBehavior;
use crate::warmup::WarmupKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Defaults applied by a [`ForkExecutor`](crate::ForkExecutor)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForkConfig {
    /// Strategy used by [`ForkExecutor::options`](crate::ForkExecutor::options)
    pub default_strategy: DispatchStrategy,

    /// Warmup used by [`ForkExecutor::options`](crate::ForkExecutor::options)
    pub default_warmup: WarmupKind,

    /// Schema conflict severity
    pub on_schema_conflict: ConflictBehavior,

    /// Prices and sizes for the advisory warmup estimate
    pub warmup_cost: WarmupCostConfig,
}

impl ForkConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default dispatch strategy
    #[inline]
    #[must_use]
    pub fn with_default_strategy(mut self, strategy: DispatchStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// With default warmup mode
    #[inline]
    #[must_use]
    pub fn with_default_warmup(mut self, warmup: WarmupKind) -> Self {
        self.default_warmup = warmup;
        self
    }

    /// With schema conflict severity
    #[inline]
    #[must_use]
    pub fn with_schema_conflict(mut self, behavior: ConflictBehavior) -> Self {
        self.on_schema_conflict = behavior;
        self
    }

    /// With warmup cost model inputs
    #[inline]
    #[must_use]
    pub fn with_warmup_cost(mut self, warmup_cost: WarmupCostConfig) -> Self {
        self.warmup_cost = warmup_cost;
        self
    }

    /// Parse and validate TOML text
    ///
    /// # Errors
    /// [`ConfigError::Parse`] for malformed TOML, [`ConfigError::Invalid`] for
    /// unacceptable values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::io_error(path, e))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), strategy = %config.default_strategy, "loaded fork config");
        Ok(config)
    }

    /// Check values serde cannot
    ///
    /// # Errors
    /// [`ConfigError::Invalid`] naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_warmup == WarmupKind::Explicit {
            return Err(ConfigError::Invalid {
                field: "default_warmup",
                reason: "explicit warmup needs a primer and cannot be a default".to_string(),
            });
        }

        let prices = [
            ("warmup_cost.cost_per_token", self.warmup_cost.cost_per_token),
            ("warmup_cost.cache_write_multiplier", self.warmup_cost.cache_write_multiplier),
            ("warmup_cost.cache_read_multiplier", self.warmup_cost.cache_read_multiplier),
        ];
        for (field, value) in prices {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be a non-negative number, got {value}"),
                });
            }
        }

        Ok(())
    }
}
