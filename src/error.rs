use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigurationError;
use crate::constraints::ConstraintError;
use crate::dispatch::TransportError;
use crate::state_machine::errors::StateMachineError;
use crate::store::StoreError;
use crate::templates::RenderError;

/// Errors surfaced to callers of the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Formation {formation_id} does not allow {operation}: {reason}")]
    InvalidFormationState {
        formation_id: Uuid,
        operation: String,
        reason: String,
    },

    #[error("Invalid status report: {0}")]
    InvalidStatusReport(String),

    #[error("Constraint '{constraint}' rejected the operation: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Constraint error: {0}")]
    Constraint(#[from] ConstraintError),

    #[error("Template error: {0}")]
    Template(#[from] RenderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Delivery error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_formation_state(
        formation_id: Uuid,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidFormationState {
            formation_id,
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
