//! Errors raised by the pure domain layer.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures only: bad fetch settings, illegal task lifecycle
/// moves and unparsable ids. Network and storage failures live in infra.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Rejected input, e.g. a zero batch size or unknown completeness.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A task transition that its current state does not allow.
    #[error("illegal task transition: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(reason: impl Into<String>) -> Self {
        DomainError::Validation(reason.into())
    }

    pub fn invariant(reason: impl Into<String>) -> Self {
        DomainError::InvariantViolation(reason.into())
    }

    pub fn invalid_id(reason: impl Into<String>) -> Self {
        DomainError::InvalidId(reason.into())
    }
}
