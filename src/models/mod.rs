pub mod constraint;
pub mod formation;
pub mod formation_assignment;
pub mod management;
pub mod notification;
pub mod participant;
pub mod status_report;
pub mod webhook;

// Re-export core models for easy access
pub use constraint::{
    Constraint, ConstraintScope, JoinPoint, NewConstraint, OperatorName, ResourceType, ANY_SUBTYPE,
};
pub use formation::{Formation, FormationMember, FormationTemplate, MemberStatus};
pub use formation_assignment::{
    normalize_configuration, AssignmentError, AssignmentKey, AssignmentOperation,
    AssignmentTransition, ErrorCode, FormationAssignment, OperationKind, OperationTrigger,
};
pub use management::{CreateFormationRequest, ManagementEvent};
pub use notification::{Destination, Notification, NotificationOperation};
pub use participant::{Participant, ParticipantType, SCENARIO_GROUPS_LABEL};
pub use status_report::{
    FormationStatusReport, FormationStatusReportRequest, StatusReport, StatusReportRequest,
};
pub use webhook::{Webhook, WebhookKind, WebhookMode};
