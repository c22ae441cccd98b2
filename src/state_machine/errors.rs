use crate::store::StoreError;
use thiserror::Error;

/// Error types for state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Guard condition failed: {reason}")]
    GuardFailed { reason: String },

    #[error("Invalid state transition from {from:?} on {event}")]
    InvalidTransition { from: Option<String>, event: String },

    /// The record moved since it was read; the transition was not applied
    #[error("Stale transition for {entity_id}: expected version {expected_version}")]
    StaleTransition {
        entity_id: String,
        expected_version: u64,
    },

    #[error("Action execution failed: {reason}")]
    ActionFailed { reason: String },

    #[error("Persistence operation failed: {reason}")]
    PersistenceFailed { reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StateMachineError {
    /// Stale transitions are the compare-and-set losing a race, never a caller-facing failure
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleTransition { .. })
    }
}

/// Specific error type for guard condition failures
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Dependencies not satisfied: {reason}")]
    DependenciesNotMet { reason: String },

    #[error("Business rule violation: {rule}")]
    BusinessRuleViolation { rule: String },

    #[error("Store lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Specific error type for action execution failures
#[derive(Error, Debug)]
pub enum ActionError {
    #[error("Event publishing failed: {event_name}")]
    EventPublishFailed { event_name: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Specific error type for persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to save transition: {reason}")]
    TransitionSaveFailed { reason: String },

    #[error("Concurrent modification detected for entity {entity_id}")]
    ConcurrentModification { entity_id: String, expected_version: u64 },

    #[error("Entity not found: {entity_id}")]
    NotFound { entity_id: String },
}

impl From<GuardError> for StateMachineError {
    fn from(err: GuardError) -> Self {
        Self::GuardFailed {
            reason: err.to_string(),
        }
    }
}

impl From<ActionError> for StateMachineError {
    fn from(err: ActionError) -> Self {
        Self::ActionFailed {
            reason: err.to_string(),
        }
    }
}

impl From<PersistenceError> for StateMachineError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::ConcurrentModification {
                entity_id,
                expected_version,
            } => Self::StaleTransition {
                entity_id,
                expected_version,
            },
            // A record deleted underneath us is the same race as a version bump
            PersistenceError::NotFound { entity_id } => Self::StaleTransition {
                entity_id,
                expected_version: 0,
            },
            other => Self::PersistenceFailed {
                reason: other.to_string(),
            },
        }
    }
}

impl From<StoreError> for PersistenceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrentModification {
                entity_id,
                expected_version,
            } => Self::ConcurrentModification {
                entity_id,
                expected_version,
            },
            StoreError::NotFound { entity_id } => Self::NotFound { entity_id },
            other => Self::TransitionSaveFailed {
                reason: other.to_string(),
            },
        }
    }
}

/// Result type aliases for convenience
pub type StateMachineResult<T> = Result<T, StateMachineError>;
pub type GuardResult<T> = Result<T, GuardError>;
pub type ActionResult<T> = Result<T, ActionError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Helper function to create a business rule violation error
pub fn business_rule_violation(rule: impl Into<String>) -> GuardError {
    GuardError::BusinessRuleViolation { rule: rule.into() }
}

/// Helper function to create a dependencies not met error
pub fn dependencies_not_met(reason: impl Into<String>) -> GuardError {
    GuardError::DependenciesNotMet {
        reason: reason.into(),
    }
}
