use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::participant::ParticipantType;

/// Subtype wildcard accepted by constraint applicability
pub const ANY_SUBTYPE: &str = "ANY";

/// Named points in the engine pipeline where constraints run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinPoint {
    AssignFormation,
    UnassignFormation,
    CreateFormation,
    DeleteFormation,
    FinalizeFormation,
    GenerateFormationAssignmentNotification,
    GenerateFormationNotification,
    SendNotification,
    NotificationStatusReturned,
}

impl JoinPoint {
    /// Management operations, where a failing gate rejects the call
    pub fn is_management(&self) -> bool {
        matches!(
            self,
            Self::AssignFormation
                | Self::UnassignFormation
                | Self::CreateFormation
                | Self::DeleteFormation
                | Self::FinalizeFormation
        )
    }

    /// Notification generation, where a failing gate suppresses the notification
    pub fn is_generation(&self) -> bool {
        matches!(
            self,
            Self::GenerateFormationAssignmentNotification | Self::GenerateFormationNotification
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AssignFormation => "AssignFormation",
            Self::UnassignFormation => "UnassignFormation",
            Self::CreateFormation => "CreateFormation",
            Self::DeleteFormation => "DeleteFormation",
            Self::FinalizeFormation => "FinalizeFormation",
            Self::GenerateFormationAssignmentNotification => {
                "GenerateFormationAssignmentNotification"
            }
            Self::GenerateFormationNotification => "GenerateFormationNotification",
            Self::SendNotification => "SendNotification",
            Self::NotificationStatusReturned => "NotificationStatusReturned",
        }
    }
}

impl fmt::Display for JoinPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource a constraint is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Application,
    Runtime,
    RuntimeContext,
    Tenant,
    Formation,
    Any,
}

impl ResourceType {
    pub fn matches(&self, participant_type: ParticipantType) -> bool {
        match self {
            Self::Any => true,
            Self::Application => participant_type == ParticipantType::Application,
            Self::Runtime => participant_type == ParticipantType::Runtime,
            Self::RuntimeContext => participant_type == ParticipantType::RuntimeContext,
            Self::Formation => matches!(
                participant_type,
                ParticipantType::Formation | ParticipantType::FormationTemplate
            ),
            Self::Tenant => false,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Application => "APPLICATION",
            Self::Runtime => "RUNTIME",
            Self::RuntimeContext => "RUNTIME_CONTEXT",
            Self::Tenant => "TENANT",
            Self::Formation => "FORMATION",
            Self::Any => "ANY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintScope {
    #[default]
    Global,
    FormationTemplate { template_id: String },
}

impl ConstraintScope {
    pub fn covers(&self, template_id: &str) -> bool {
        match self {
            Self::Global => true,
            Self::FormationTemplate { template_id: scoped } => scoped == template_id,
        }
    }
}

/// The closed set of operators a constraint can run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorName {
    ContainsScenarioGroups,
    IsNotAssignedToAnyFormationOfType,
    DoesNotContainResourceOfSubtype,
    DoNotGenerateFormationAssignmentNotification,
    DoNotGenerateFormationAssignmentNotificationForLoops,
    ConfigMutator,
    RedirectNotification,
    AsynchronousFlowControl,
}

impl fmt::Display for OperatorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A policy unit attached at a join point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: Uuid,
    pub name: String,
    pub join_point: JoinPoint,
    pub operator: OperatorName,
    pub resource_type: ResourceType,
    pub resource_subtype: String,
    pub scope: ConstraintScope,
    /// Higher runs first; ties run in attachment order
    pub priority: i32,
    /// Rendered against the join-point context to produce the operator input
    pub input_template: String,
    /// Attachment sequence assigned by the store
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl Constraint {
    /// Applies to a resource of this type/subtype within a formation of this template
    pub fn applies_to(
        &self,
        participant_type: ParticipantType,
        subtype: Option<&str>,
        template_id: &str,
    ) -> bool {
        let subtype_matches = self.resource_subtype == ANY_SUBTYPE
            || subtype.map(|s| s == self.resource_subtype).unwrap_or(false);
        self.resource_type.matches(participant_type)
            && subtype_matches
            && self.scope.covers(template_id)
    }
}

/// Request to attach a constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConstraint {
    pub name: String,
    pub join_point: JoinPoint,
    pub operator: OperatorName,
    #[serde(default = "any_resource_type")]
    pub resource_type: ResourceType,
    #[serde(default = "any_subtype")]
    pub resource_subtype: String,
    #[serde(default)]
    pub scope: ConstraintScope,
    #[serde(default)]
    pub priority: i32,
    pub input_template: String,
}

fn any_resource_type() -> ResourceType {
    ResourceType::Any
}

fn any_subtype() -> String {
    ANY_SUBTYPE.to_string()
}

impl NewConstraint {
    pub fn new(
        name: impl Into<String>,
        join_point: JoinPoint,
        operator: OperatorName,
        input_template: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            join_point,
            operator,
            resource_type: ResourceType::Any,
            resource_subtype: any_subtype(),
            scope: ConstraintScope::Global,
            priority: 0,
            input_template: input_template.into(),
        }
    }

    pub fn for_resource(mut self, resource_type: ResourceType, subtype: impl Into<String>) -> Self {
        self.resource_type = resource_type;
        self.resource_subtype = subtype.into();
        self
    }

    pub fn scoped_to_template(mut self, template_id: impl Into<String>) -> Self {
        self.scope = ConstraintScope::FormationTemplate {
            template_id: template_id.into(),
        };
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn into_constraint(self, sequence: u64) -> Constraint {
        Constraint {
            id: Uuid::new_v4(),
            name: self.name,
            join_point: self.join_point,
            operator: self.operator,
            resource_type: self.resource_type,
            resource_subtype: self.resource_subtype,
            scope: self.scope,
            priority: self.priority,
            input_template: self.input_template,
            sequence,
            created_at: Utc::now(),
        }
    }
}
