use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::participant::ParticipantType;

/// Membership and lifecycle events delivered by the management layer.
///
/// Redelivery of the same event is idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagementEvent {
    FormationCreated {
        #[serde(default)]
        formation_id: Option<Uuid>,
        name: String,
        tenant: String,
        template_id: String,
        #[serde(default)]
        draft: bool,
    },
    FormationFinalized {
        formation_id: Uuid,
        tenant: String,
    },
    FormationDeleted {
        formation_id: Uuid,
        tenant: String,
    },
    ParticipantAssigned {
        formation_id: Uuid,
        participant_id: String,
        participant_type: ParticipantType,
        tenant: String,
    },
    ParticipantUnassigned {
        formation_id: Uuid,
        participant_id: String,
        participant_type: ParticipantType,
        tenant: String,
    },
}

impl ManagementEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FormationCreated { .. } => "formation_created",
            Self::FormationFinalized { .. } => "formation_finalized",
            Self::FormationDeleted { .. } => "formation_deleted",
            Self::ParticipantAssigned { .. } => "participant_assigned",
            Self::ParticipantUnassigned { .. } => "participant_unassigned",
        }
    }

    pub fn tenant(&self) -> &str {
        match self {
            Self::FormationCreated { tenant, .. }
            | Self::FormationFinalized { tenant, .. }
            | Self::FormationDeleted { tenant, .. }
            | Self::ParticipantAssigned { tenant, .. }
            | Self::ParticipantUnassigned { tenant, .. } => tenant,
        }
    }
}

/// Request to create a formation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateFormationRequest {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub tenant: String,
    pub template_id: String,
    #[serde(default)]
    pub draft: bool,
}

impl CreateFormationRequest {
    pub fn new(
        name: impl Into<String>,
        tenant: impl Into<String>,
        template_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            name: name.into(),
            tenant: tenant.into(),
            template_id: template_id.into(),
            draft: false,
        }
    }

    pub fn draft(mut self) -> Self {
        self.draft = true;
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }
}
