//! Domain error model.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::id::MemberId;
use crate::money::Money;

/// Result type used across the ledger.
pub type DomainResult<T> = Result<T, DomainError>;

/// Diagnostic attached to a failed zero-sum check.
///
/// Carries the computed (non-zero) total and every member's balance so the
/// corrupted upstream data can be located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InconsistencyReport {
    pub total: Money,
    pub balances: BTreeMap<MemberId, Money>,
}

impl core::fmt::Display for InconsistencyReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "balances sum to {} instead of 0.00 [", self.total)?;
        for (idx, (member, balance)) in self.balances.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{member}: {balance}")?;
        }
        f.write_str("]")
    }
}

/// Ledger-level error.
///
/// Every variant is a deterministic business or integrity failure. Callers
/// branch on the variant, never on the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or policy-violating input. Recoverable by correcting input.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The actor lacks the required role or relationship.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A settlement state-machine precondition was violated.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A referenced entity does not exist under the expected parent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The zero-sum invariant failed; upstream data is corrupted.
    #[error("ledger inconsistency: {0}")]
    LedgerInconsistency(InconsistencyReport),

    /// A store-level conflict (duplicate id, stale aggregate version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The storage backend itself failed. Not a business outcome and not
    /// retryable as a conflict.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn inconsistency(total: Money, balances: BTreeMap<MemberId, Money>) -> Self {
        Self::LedgerInconsistency(InconsistencyReport { total, balances })
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Stable, machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::Unauthorized(_) => "unauthorized",
            DomainError::InvalidTransition(_) => "invalid_transition",
            DomainError::NotFound(_) => "not_found",
            DomainError::LedgerInconsistency(_) => "ledger_inconsistency",
            DomainError::Conflict(_) => "conflict",
            DomainError::InvalidId(_) => "invalid_id",
            DomainError::Storage(_) => "storage",
        }
    }
}
