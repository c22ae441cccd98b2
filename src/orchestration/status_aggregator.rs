use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{AssignmentError, Formation, FormationAssignment, ParticipantType};
use crate::state_machine::{AssignmentState, FormationCondition, FormationState};

/// Condition of a formation derived from its lifecycle and its assignments
pub fn aggregate_condition(
    formation_state: FormationState,
    assignment_states: impl IntoIterator<Item = AssignmentState>,
) -> FormationCondition {
    if formation_state == FormationState::Draft {
        return FormationCondition::Draft;
    }

    let mut in_progress = formation_state.is_pending();
    let mut errored = formation_state.is_error();
    for state in assignment_states {
        errored |= state.is_error();
        in_progress |= state.is_in_progress();
    }

    if errored {
        FormationCondition::Error
    } else if in_progress {
        FormationCondition::InProgress
    } else {
        FormationCondition::Ready
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentStatusView {
    pub id: Uuid,
    pub source: String,
    pub source_type: ParticipantType,
    pub target: String,
    pub target_type: ParticipantType,
    pub state: AssignmentState,
    pub value: Option<Value>,
    pub error: Option<AssignmentError>,
    pub operation_id: Option<u64>,
    pub awaiting_callback: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<&FormationAssignment> for AssignmentStatusView {
    fn from(assignment: &FormationAssignment) -> Self {
        Self {
            id: assignment.id,
            source: assignment.key.source.clone(),
            source_type: assignment.key.source_type,
            target: assignment.key.target.clone(),
            target_type: assignment.key.target_type,
            state: assignment.state,
            value: assignment.value.clone(),
            error: assignment.error.clone(),
            operation_id: assignment.operation_id(),
            awaiting_callback: assignment.awaiting_callback,
            updated_at: assignment.updated_at,
        }
    }
}

/// One error contributing to an ERROR condition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationErrorView {
    /// `None` for the formation's own lifecycle error
    pub assignment_id: Option<Uuid>,
    #[serde(flatten)]
    pub error: AssignmentError,
}

/// Read model of a formation and its assignments
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationStatusView {
    pub formation_id: Uuid,
    pub name: String,
    pub tenant: String,
    pub state: FormationState,
    pub condition: FormationCondition,
    pub errors: Vec<FormationErrorView>,
    pub assignments: Vec<AssignmentStatusView>,
}

impl FormationStatusView {
    pub fn build(formation: &Formation, assignments: &[FormationAssignment]) -> Self {
        let condition = aggregate_condition(formation.state, assignments.iter().map(|a| a.state));

        let lifecycle_error = formation.error.clone().map(|error| FormationErrorView {
            assignment_id: None,
            error,
        });
        let errors = lifecycle_error
            .into_iter()
            .chain(assignments.iter().filter(|a| a.state.is_error()).filter_map(|a| {
                a.error.clone().map(|error| FormationErrorView {
                    assignment_id: Some(a.id),
                    error,
                })
            }))
            .collect();

        Self {
            formation_id: formation.id,
            name: formation.name.clone(),
            tenant: formation.tenant.clone(),
            state: formation.state,
            condition,
            errors,
            assignments: assignments.iter().map(AssignmentStatusView::from).collect(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.condition == FormationCondition::Ready
    }
}
