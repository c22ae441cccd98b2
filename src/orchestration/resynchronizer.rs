use serde::Serialize;
use uuid::Uuid;

use super::assignment_processor::{DriveSummary, WorkItem};
use crate::models::FormationAssignment;
use crate::state_machine::{AssignmentState, FormationState};

/// Result of re-driving a formation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResyncReport {
    pub formation_id: Uuid,
    /// Assignments scheduled again
    pub redriven: usize,
    /// READY assignments left alone
    pub untouched: usize,
    /// Formation state after the run, `None` once it was removed
    pub formation_state: Option<FormationState>,
    pub summary: DriveSummary,
}

/// Work for every assignment that is not READY; errors get retried, outstanding
/// asynchronous requests are re-issued under their operation id
pub fn plan_resync(assignments: &[FormationAssignment]) -> (Vec<WorkItem>, usize) {
    let (ready, pending): (Vec<_>, Vec<_>) = assignments
        .iter()
        .partition(|a| a.state == AssignmentState::Ready);

    let items = pending
        .into_iter()
        .map(|a| WorkItem::resync(a.key.clone()))
        .collect();
    (items, ready.len())
}
