use uuid::Uuid;

use crate::models::{Formation, FormationAssignment, Participant};

/// Everything an operator may inspect, loaded by the caller before evaluation
#[derive(Debug, Clone, Default)]
pub struct ConstraintFacts {
    pub formation_id: Option<Uuid>,
    /// Participant being assigned or unassigned
    pub participant: Option<Participant>,
    /// Formations the participant currently belongs to
    pub participant_formations: Vec<Formation>,
    /// Current members of the formation
    pub formation_members: Vec<Participant>,
    pub source: Option<Participant>,
    pub target: Option<Participant>,
    pub assignment: Option<FormationAssignment>,
    pub reverse: Option<FormationAssignment>,
}

impl ConstraintFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_formation_id(mut self, formation_id: Uuid) -> Self {
        self.formation_id = Some(formation_id);
        self
    }

    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.participant = Some(participant);
        self
    }

    pub fn with_participant_formations(mut self, formations: Vec<Formation>) -> Self {
        self.participant_formations = formations;
        self
    }

    pub fn with_formation_members(mut self, members: Vec<Participant>) -> Self {
        self.formation_members = members;
        self
    }

    pub fn with_source(mut self, source: Participant) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_target(mut self, target: Participant) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_assignment(mut self, assignment: FormationAssignment) -> Self {
        self.formation_id = Some(assignment.formation_id());
        self.assignment = Some(assignment);
        self
    }

    pub fn with_reverse(mut self, reverse: Option<FormationAssignment>) -> Self {
        self.reverse = reverse;
        self
    }
}
