use crate::models::AssignmentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::states::AssignmentState;

/// Events that can trigger formation assignment state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AssignmentEvent {
    /// Receiver accepted the assignment, optionally returning configuration
    Complete(Option<Value>),
    /// Receiver accepted but is waiting on configuration from the other side
    MarkConfigPending(Option<Value>),
    /// Receiver confirmed creation; a second confirmation finalizes it
    ConfirmCreate(Option<Value>),
    /// Creation failed
    FailCreate(AssignmentError),
    /// Start removing the assignment
    BeginDelete,
    /// Receiver confirmed removal; a second confirmation finalizes it
    ConfirmDelete,
    /// Removal failed
    FailDelete(AssignmentError),
    /// Removal finished; the record goes away
    Remove,
    /// Re-enter the pipeline from an error state
    Retry,
    /// Re-notify an established assignment because its counterpart changed
    Renotify,
    /// Receiver-driven reset of an established assignment
    Reset {
        state: AssignmentState,
        configuration: Value,
    },
}

impl AssignmentEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Complete(_) => "complete",
            Self::MarkConfigPending(_) => "mark_config_pending",
            Self::ConfirmCreate(_) => "confirm_create",
            Self::FailCreate(_) => "fail_create",
            Self::BeginDelete => "begin_delete",
            Self::ConfirmDelete => "confirm_delete",
            Self::FailDelete(_) => "fail_delete",
            Self::Remove => "remove",
            Self::Retry => "retry",
            Self::Renotify => "renotify",
            Self::Reset { .. } => "reset",
        }
    }

    /// Extract the error if this is a failure event
    pub fn error(&self) -> Option<&AssignmentError> {
        match self {
            Self::FailCreate(err) | Self::FailDelete(err) => Some(err),
            _ => None,
        }
    }

    /// Configuration carried by the event, if any
    pub fn configuration(&self) -> Option<&Value> {
        match self {
            Self::Complete(config)
            | Self::MarkConfigPending(config)
            | Self::ConfirmCreate(config) => config.as_ref(),
            Self::Reset { configuration, .. } => Some(configuration),
            _ => None,
        }
    }

    /// Create a failure event for the given phase
    pub fn fail(unassign: bool, error: AssignmentError) -> Self {
        if unassign {
            Self::FailDelete(error)
        } else {
            Self::FailCreate(error)
        }
    }
}

/// Events that drive the formation-level lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FormationEvent {
    /// Leave DRAFT and start the lifecycle create path
    Finalize,
    /// The lifecycle webhook (or its absence) confirmed the current phase
    LifecycleSucceeded,
    /// The lifecycle webhook reported a failure for the current phase
    LifecycleFailed(AssignmentError),
    /// Start tearing the formation down
    BeginDelete,
    /// Re-enter the lifecycle from an error state
    Retry,
}

impl FormationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Finalize => "finalize",
            Self::LifecycleSucceeded => "lifecycle_succeeded",
            Self::LifecycleFailed(_) => "lifecycle_failed",
            Self::BeginDelete => "begin_delete",
            Self::Retry => "retry",
        }
    }
}
