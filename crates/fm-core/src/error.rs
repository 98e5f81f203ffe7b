//! Error type for the fork/merge pipeline

use fm_fork::ForkError;
use fm_merge::MergeError;

/// Pipeline error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The fork phase failed
    #[error("fork failed: {0}")]
    Fork(#[from] ForkError),

    /// The merge phase failed
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
}

impl Error {
    /// Caller mistakes: empty inputs, bad options, unknown strategies
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Fork(e) => e.is_configuration(),
            Self::Merge(e) => e.is_configuration(),
        }
    }

    /// Branch index the error refers to, if any
    #[must_use]
    pub fn branch_index(&self) -> Option<usize> {
        match self {
            Self::Fork(e) => e.branch_index(),
            Self::Merge(e) => e.branch(),
        }
    }

    /// Name of the active dispatch or merge strategy, if any
    #[must_use]
    pub fn strategy_name(&self) -> Option<String> {
        match self {
            Self::Fork(e) => e.strategy().map(|s| s.to_string()),
            Self::Merge(e) => e.strategy().map(ToString::to_string),
        }
    }
}

/// Pipeline result alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use fm_fork::DispatchStrategy;

    #[test]
    fn fork_error_context_survives_wrapping() {
        let err = Error::from(ForkError::Branch {
            index: 2,
            strategy: DispatchStrategy::FastParallel,
            source: anyhow::anyhow!("rate limited"),
        });
        assert_eq!(err.branch_index(), Some(2));
        assert_eq!(err.strategy_name().as_deref(), Some("fast-parallel"));
        assert!(!err.is_configuration());
        assert_eq!(err.to_string(), "fork failed: [fast-parallel] branch 2 failed: rate limited");
    }

    #[test]
    fn merge_error_is_configuration() {
        let err = Error::from(MergeError::EmptyInput {
            strategy: "weighted-vote".to_string(),
        });
        assert!(err.is_configuration());
        assert_eq!(err.strategy_name().as_deref(), Some("weighted-vote"));
    }
}
