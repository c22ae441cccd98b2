//! # Status Reports
//!
//! Translation of a validated [`StatusReport`] into the assignment event it causes.
//! Sync responses and callback reports both end up here, so the two paths cannot drift
//! apart.
//!
//! Intermediate states (`CREATE_READY`, `DELETE_READY`) are persisted as-is when they
//! arrive by callback and a final report is still expected. A synchronous response has
//! no later report, so without a pending confirmation they finalize immediately.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::constants::messages::REPORTED_ERROR_WITHOUT_MESSAGE;
use crate::models::{AssignmentError, ErrorCode, FormationAssignment, StatusReport};
use crate::state_machine::{AssignmentEvent, AssignmentState, TransitionOutcome};

/// Event a report causes for an assignment in the given phase
pub fn report_event(
    report: &StatusReport,
    unassign: bool,
    error_code: ErrorCode,
    finalize_intermediate: bool,
) -> Result<AssignmentEvent, String> {
    use AssignmentState::*;

    let configuration = report.configuration.clone();
    let event = match (unassign, report.state) {
        (_, state) if state.is_error() => {
            let message = report
                .error
                .clone()
                .unwrap_or_else(|| REPORTED_ERROR_WITHOUT_MESSAGE.to_string());
            AssignmentEvent::fail(unassign, AssignmentError::new(message, error_code))
        }

        (false, Ready) => AssignmentEvent::Complete(configuration),
        (false, ConfigPending) => AssignmentEvent::MarkConfigPending(configuration),
        (false, CreateReady) if finalize_intermediate => AssignmentEvent::Complete(configuration),
        (false, CreateReady) => AssignmentEvent::ConfirmCreate(configuration),

        (true, Ready) => AssignmentEvent::Remove,
        (true, DeleteReady) if finalize_intermediate => AssignmentEvent::Remove,
        (true, DeleteReady) => AssignmentEvent::ConfirmDelete,

        (unassign, state) => {
            let phase = if unassign { "unassign" } else { "assign" };
            return Err(format!("state {state} cannot be applied to an {phase} operation"));
        }
    };

    Ok(event)
}

/// What happened to a callback report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StatusReportOutcome {
    Applied { assignment: FormationAssignment },
    Removed { assignment_id: Uuid },
    Ignored { reason: String },
}

impl StatusReportOutcome {
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }

    pub fn from_transition(outcome: Option<TransitionOutcome>) -> Self {
        match outcome {
            Some(TransitionOutcome::Updated(assignment)) => Self::Applied { assignment },
            Some(TransitionOutcome::Removed(assignment)) => Self::Removed {
                assignment_id: assignment.id,
            },
            None => Self::ignored("superseded by a newer write"),
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored { .. })
    }
}

/// Reason a callback for this assignment must be dropped, if any
pub fn ignore_reason(assignment: &FormationAssignment, report: &StatusReport) -> Option<String> {
    if !assignment.awaiting_callback {
        return Some(format!(
            "assignment {} is not awaiting a status report",
            assignment.id
        ));
    }
    match (report.operation_id, assignment.operation_id()) {
        (Some(reported), Some(current)) if reported != current => Some(format!(
            "operation {reported} does not match the outstanding operation {current}"
        )),
        (Some(reported), None) => Some(format!("operation {reported} is unknown")),
        (None, current) => {
            debug!(
                assignment_id = %assignment.id,
                operation_id = ?current,
                "Status report carries no operation id; correlating with the open operation"
            );
            None
        }
        _ => None,
    }
}
