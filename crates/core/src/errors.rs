use thiserror::Error;

use crate::{domain::conversation::ConversationStatus, flows::IntakeTransitionError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid conversation transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: ConversationStatus, to: ConversationStatus },
    #[error(transparent)]
    IntakeTransition(#[from] IntakeTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures above the domain layer. Carried as text because the boundary
/// only ever logs them; the customer sees a fixed apology instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
}
