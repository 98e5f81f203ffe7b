//! Warmup cost model
//!
//! Advisory helpers for deciding whether a priming call pays for itself.
//! Nothing here is enforced by the executor.
//!
//! The model: without warmup, N concurrent branches all miss the cache and
//! each pays the cache-write rate on the shared prefix. With an explicit
//! primer, one extra call pays the write rate and all N branches then read
//! the prefix at the read rate. With first-branch warmup, branch 0 is the
//! priming call, so only the remaining N-1 branches read.
//! Prefixes shorter than the minimum cacheable size are never cached.

use crate::warmup::WarmupKind;
use serde::{Deserialize, Serialize};

/// Inputs to the warmup cost model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmupCostConfig {
    /// Tokens in the prefix shared by every branch
    pub prefix_tokens: u64,

    /// Branches in the fan-out
    pub branch_count: usize,

    /// Base price per input token
    pub cost_per_token: f64,

    /// Price multiplier for writing a cache entry
    pub cache_write_multiplier: f64,

    /// Price multiplier for reading a cache entry
    pub cache_read_multiplier: f64,

    /// Shortest prefix the upstream cache accepts
    pub min_cacheable_tokens: u64,
}

impl Default for WarmupCostConfig {
    fn default() -> Self {
        Self {
            prefix_tokens: 0,
            branch_count: 2,
            cost_per_token: 0.000_003,
            cache_write_multiplier: 1.25,
            cache_read_multiplier: 0.1,
            min_cacheable_tokens: 1024,
        }
    }
}

impl WarmupCostConfig {
    /// Config for a prefix shared by `branch_count` branches, default prices
    #[inline]
    #[must_use]
    pub fn new(prefix_tokens: u64, branch_count: usize) -> Self {
        Self {
            prefix_tokens,
            branch_count,
            ..Self::default()
        }
    }

    /// With base price per token
    #[inline]
    #[must_use]
    pub fn with_cost_per_token(mut self, cost: f64) -> Self {
        self.cost_per_token = cost;
        self
    }

    /// With cache write and read multipliers
    #[inline]
    #[must_use]
    pub fn with_multipliers(mut self, write: f64, read: f64) -> Self {
        self.cache_write_multiplier = write;
        self.cache_read_multiplier = read;
        self
    }

    /// With minimum cacheable prefix size
    #[inline]
    #[must_use]
    pub fn with_min_cacheable_tokens(mut self, tokens: u64) -> Self {
        self.min_cacheable_tokens = tokens;
        self
    }

    /// Whether the prefix is long enough to be cached at all
    #[inline]
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.prefix_tokens >= self.min_cacheable_tokens
    }

    #[allow(clippy::cast_precision_loss)]
    fn prefix_cost(&self) -> f64 {
        self.prefix_tokens as f64 * self.cost_per_token
    }

    #[allow(clippy::cast_precision_loss)]
    fn branches(&self) -> f64 {
        self.branch_count as f64
    }
}

/// Cost of the priming call itself
#[must_use]
pub fn estimate_warmup_cost(config: &WarmupCostConfig) -> f64 {
    if config.is_cacheable() {
        config.prefix_cost() * config.cache_write_multiplier
    } else {
        config.prefix_cost()
    }
}

/// Expected saving from an explicit primer; negative when warmup costs more
///
/// Use [`WarmupEstimate::for_mode`] for first-branch warmup.
#[must_use]
pub fn estimate_savings(config: &WarmupCostConfig) -> f64 {
    WarmupEstimate::from_config(config).savings
}

/// Whether warming up is expected to pay for itself
#[inline]
#[must_use]
pub fn should_warmup(estimate: &WarmupEstimate) -> bool {
    estimate.cacheable && estimate.savings > 0.0
}

/// Full cost comparison for one fork
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmupEstimate {
    /// Warmup mode the figures assume
    pub mode: WarmupKind,

    /// Cost of the priming call
    pub warmup_cost: f64,

    /// Prefix cost of the fan-out without warmup
    pub cost_without_warmup: f64,

    /// Prefix cost of warmup plus fan-out
    pub cost_with_warmup: f64,

    /// `cost_without_warmup - cost_with_warmup`
    pub savings: f64,

    /// Whether the prefix can be cached at all
    pub cacheable: bool,
}

impl WarmupEstimate {
    /// Evaluate the cost model for an explicit primer
    #[must_use]
    pub fn from_config(config: &WarmupCostConfig) -> Self {
        Self::for_mode(config, WarmupKind::Explicit)
    }

    /// Evaluate the cost model for `mode`
    ///
    /// Under [`WarmupKind::None`] nothing is primed and savings are zero.
    #[must_use]
    pub fn for_mode(config: &WarmupCostConfig, mode: WarmupKind) -> Self {
        let base = config.prefix_cost();
        let n = config.branches();
        let cacheable = config.is_cacheable();
        let (write, read) = if cacheable {
            (config.cache_write_multiplier, config.cache_read_multiplier)
        } else {
            (1.0, 1.0)
        };

        let without = n * base * write;
        let (warmup_cost, with) = match mode {
            WarmupKind::None => (0.0, without),
            WarmupKind::Explicit => {
                let warmup_cost = estimate_warmup_cost(config);
                (warmup_cost, warmup_cost + n * base * read)
            }
            WarmupKind::FirstBranch => {
                let warmup_cost = estimate_warmup_cost(config);
                let rest = (n - 1.0).max(0.0);
                (warmup_cost, warmup_cost + rest * base * read)
            }
        };

        Self {
            mode,
            warmup_cost,
            cost_without_warmup: without,
            cost_with_warmup: with,
            savings: without - with,
            cacheable,
        }
    }

    /// Shorthand for [`should_warmup`]
    #[inline]
    #[must_use]
    pub fn should_warmup(&self) -> bool {
        should_warmup(self)
    }
}
