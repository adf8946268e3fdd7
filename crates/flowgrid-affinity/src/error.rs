//! Affinity evaluation error types.

use thiserror::Error;

/// Configuration errors: the matcher refuses to guess intent and never
/// defaults to a permissive or restrictive answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AffinityError {
    #[error("unsupported selector type: {0}")]
    UnsupportedSelectorType(i32),

    #[error("unknown node selector operator: {0:?}")]
    UnknownOperator(String),
}

pub type AffinityResult<T> = Result<T, AffinityError>;
