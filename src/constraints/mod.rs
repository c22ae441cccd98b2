//! # Constraint Engine
//!
//! Policy units attached at named join points of the pipeline. A constraint names an
//! operator from a closed set, the resources it applies to and an input template that
//! is rendered against the join-point context into the operator's typed input.
//!
//! Operators come in four kinds:
//!
//! - **Gates** veto an operation. At management join points the call is rejected, at
//!   notification generation the notification is suppressed.
//! - **Mutators** rewrite a returned status report before it is applied.
//! - **Redirects** change where a notification is delivered.
//! - **Flow control** defers delivery, fans it out or asks for a second confirmation.
//!
//! Applicable constraints run by priority (highest first), ties in attachment order.

pub mod engine;
pub mod facts;
pub mod operators;
pub mod registry;

pub use engine::{
    ConstraintEngine, GenerationDecision, JoinPointContext, SendDecision, StatusDecision,
};
pub use facts::ConstraintFacts;
pub use operators::{
    ConfigMutatorInput, ConstraintOperator, FlowControlBehavior, GateOperator, GateVerdict,
    RedirectNotificationInput,
};
pub use registry::OperatorRegistry;

use thiserror::Error;

use crate::models::{JoinPoint, OperatorName};
use crate::templates::RenderError;

#[derive(Debug, Error)]
pub enum ConstraintError {
    #[error("Operator {operator} cannot be attached at {join_point}")]
    UnsupportedJoinPoint {
        operator: OperatorName,
        join_point: JoinPoint,
    },

    #[error("Invalid input for {operator}: {message}")]
    InvalidInput {
        operator: OperatorName,
        message: String,
    },

    #[error("Input template failed: {0}")]
    Render(#[from] RenderError),
}

pub type ConstraintResult<T> = Result<T, ConstraintError>;
