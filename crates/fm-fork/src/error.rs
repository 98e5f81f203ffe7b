//! Error types for fork execution
//!
//! Every fatal error names the active dispatch strategy and, where one
//! applies, the branch index.

use crate::executor::DispatchStrategy;
use crate::schema::SchemaConflictError;
use fm_value::ValueError;
use std::path::PathBuf;

/// Fork execution error
#[derive(Debug, thiserror::Error)]
pub enum ForkError {
    /// Zero branches supplied
    #[error("[{strategy}] cannot fork zero branches")]
    EmptyFork {
        /// Requested dispatch strategy
        strategy: DispatchStrategy,
    },

    /// A branch returned an error; the fork was aborted
    #[error("[{strategy}] branch {index} failed: {source}")]
    Branch {
        /// Failing branch index
        index: usize,
        /// Active dispatch strategy
        strategy: DispatchStrategy,
        /// The branch's own error, unchanged
        #[source]
        source: anyhow::Error,
    },

    /// A branch task panicked or was torn down
    #[error("[{strategy}] branch {index} panicked: {message}")]
    BranchPanicked {
        /// Failing branch index
        index: usize,
        /// Active dispatch strategy
        strategy: DispatchStrategy,
        /// Panic payload, when it was a string
        message: String,
    },

    /// A branch produced a malformed tagged value
    #[error("[{strategy}] branch {index} produced an invalid value: {source}")]
    InvalidBranchValue {
        /// Failing branch index
        index: usize,
        /// Active dispatch strategy
        strategy: DispatchStrategy,
        /// Validation failure
        #[source]
        source: ValueError,
    },

    /// The explicit primer call failed
    #[error("[{strategy}] warmup primer failed: {source}")]
    Warmup {
        /// Active dispatch strategy
        strategy: DispatchStrategy,
        /// The primer's own error
        #[source]
        source: anyhow::Error,
    },

    /// Branch output schemas diverged under the `error` behavior
    #[error("[{strategy}] {source}")]
    SchemaConflict {
        /// Active dispatch strategy
        strategy: DispatchStrategy,
        /// Conflict details
        #[source]
        source: SchemaConflictError,
    },

    /// Fork options inconsistent with the branch list
    #[error("[{strategy}] invalid fork options: {reason}")]
    InvalidOptions {
        /// Active dispatch strategy
        strategy: DispatchStrategy,
        /// What was wrong
        reason: String,
    },

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ForkError {
    /// Branch index the error refers to, if any
    #[must_use]
    pub fn branch_index(&self) -> Option<usize> {
        match self {
            Self::Branch { index, .. }
            | Self::BranchPanicked { index, .. }
            | Self::InvalidBranchValue { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Dispatch strategy that was active, if any
    #[must_use]
    pub fn strategy(&self) -> Option<DispatchStrategy> {
        match self {
            Self::EmptyFork { strategy }
            | Self::Branch { strategy, .. }
            | Self::BranchPanicked { strategy, .. }
            | Self::InvalidBranchValue { strategy, .. }
            | Self::Warmup { strategy, .. }
            | Self::SchemaConflict { strategy, .. }
            | Self::InvalidOptions { strategy, .. } => Some(*strategy),
            Self::Config(_) => None,
        }
    }

    /// Configuration errors: caller mistakes, never worth retrying
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::EmptyFork { .. } | Self::InvalidOptions { .. } | Self::Config(_)
        )
    }

    /// Failures raised by branch code itself
    #[inline]
    #[must_use]
    pub fn is_branch_failure(&self) -> bool {
        matches!(
            self,
            Self::Branch { .. } | Self::BranchPanicked { .. } | Self::InvalidBranchValue { .. }
        )
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Config text is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not acceptable
    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What was wrong
        reason: String,
    },
}

impl ConfigError {
    /// Create I/O error with path
    #[inline]
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
