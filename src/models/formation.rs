use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::formation_assignment::AssignmentError;
use super::participant::ParticipantType;
use super::webhook::Webhook;
use crate::state_machine::states::FormationState;

/// A named grouping of participants whose pairwise relationships are tracked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formation {
    pub id: Uuid,
    pub name: String,
    pub tenant: String,
    pub template_id: String,
    pub state: FormationState,
    /// An asynchronous lifecycle notification is outstanding
    pub awaiting_callback: bool,
    /// Last lifecycle webhook error
    pub error: Option<AssignmentError>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Formation {
    pub fn new(
        id: Uuid,
        name: impl Into<String>,
        tenant: impl Into<String>,
        template_id: impl Into<String>,
        state: FormationState,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            tenant: tenant.into(),
            template_id: template_id.into(),
            state,
            awaiting_callback: false,
            error: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_draft(&self) -> bool {
        self.state == FormationState::Draft
    }

    /// Assignment notifications are only sent once the formation lifecycle settled
    pub fn allows_assign_notifications(&self) -> bool {
        self.state == FormationState::Ready
    }

    pub fn allows_unassign_notifications(&self) -> bool {
        matches!(
            self.state,
            FormationState::Ready | FormationState::Deleting | FormationState::DeleteError
        )
    }
}

/// Formation template: the type a formation is created from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationTemplate {
    pub id: String,
    pub name: String,
    /// Receives formation create/delete notifications
    #[serde(default)]
    pub webhook: Option<Webhook>,
}

impl FormationTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, webhook: Webhook) -> Self {
        self.webhook = Some(webhook);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Active,
    /// Removal requested; the membership goes away once its assignments are gone
    Unassigning,
}

/// A participant's membership in a formation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationMember {
    pub formation_id: Uuid,
    pub participant_id: String,
    pub participant_type: ParticipantType,
    pub status: MemberStatus,
    pub assigned_at: DateTime<Utc>,
}

impl FormationMember {
    pub fn active(
        formation_id: Uuid,
        participant_id: impl Into<String>,
        participant_type: ParticipantType,
    ) -> Self {
        Self {
            formation_id,
            participant_id: participant_id.into(),
            participant_type,
            status: MemberStatus::Active,
            assigned_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}
