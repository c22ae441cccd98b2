// State machine module for formation assignments and formations
//
// Transitions are pure functions of (state, event); persistence is a compare-and-set on
// the version that was read, so a writer that lost a race gets a stale-transition error.

pub mod actions;
pub mod assignment_state_machine;
pub mod errors;
pub mod events;
pub mod formation_state_machine;
pub mod guards;
pub mod persistence;
pub mod states;

// Re-export main types for convenient access
pub use assignment_state_machine::{AssignmentStateMachine, TransitionOutcome};
pub use errors::{ActionError, GuardError, PersistenceError, StateMachineError};
pub use events::{AssignmentEvent, FormationEvent};
pub use formation_state_machine::FormationStateMachine;
pub use states::{AssignmentState, FormationCondition, FormationState};

// Common traits and utilities
pub use actions::StateAction;
pub use guards::{dispatch_guards, GuardContext, StateGuard};
pub use persistence::TransitionPersistence;
