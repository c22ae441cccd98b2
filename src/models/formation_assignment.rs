use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use super::participant::ParticipantType;
use crate::state_machine::states::AssignmentState;

/// Composite identity of an assignment: one record per ordered pair per formation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssignmentKey {
    pub formation_id: Uuid,
    pub source: String,
    pub source_type: ParticipantType,
    pub target: String,
    pub target_type: ParticipantType,
}

impl AssignmentKey {
    pub fn new(
        formation_id: Uuid,
        source: impl Into<String>,
        source_type: ParticipantType,
        target: impl Into<String>,
        target_type: ParticipantType,
    ) -> Self {
        Self {
            formation_id,
            source: source.into(),
            source_type,
            target: target.into(),
            target_type,
        }
    }

    /// Key of the self-referencing assignment of a participant
    pub fn self_assignment(
        formation_id: Uuid,
        participant: impl Into<String>,
        participant_type: ParticipantType,
    ) -> Self {
        let participant = participant.into();
        Self::new(
            formation_id,
            participant.clone(),
            participant_type,
            participant,
            participant_type,
        )
    }

    pub fn reverse(&self) -> Self {
        Self {
            formation_id: self.formation_id,
            source: self.target.clone(),
            source_type: self.target_type,
            target: self.source.clone(),
            target_type: self.source_type,
        }
    }

    pub fn is_self(&self) -> bool {
        self.source == self.target && self.source_type == self.target_type
    }

    pub fn involves(&self, participant_id: &str) -> bool {
        self.source == participant_id || self.target == participant_id
    }
}

impl fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}({})->{}({})",
            self.formation_id, self.source, self.source_type, self.target, self.target_type
        )
    }
}

/// Error classification carried on assignments and formations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Rendering, transport and other engine-side failures
    TechnicalError,
    /// A structured error body returned by the receiver
    ClientError,
}

impl ErrorCode {
    pub fn code(&self) -> u8 {
        match self {
            Self::TechnicalError => 1,
            Self::ClientError => 2,
        }
    }
}

/// Last error recorded for an assignment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentError {
    pub message: String,
    pub error_code: ErrorCode,
}

impl AssignmentError {
    pub fn new(message: impl Into<String>, error_code: ErrorCode) -> Self {
        Self {
            message: message.into(),
            error_code,
        }
    }

    pub fn technical(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCode::TechnicalError)
    }

    pub fn client(message: impl Into<String>) -> Self {
        Self::new(message, ErrorCode::ClientError)
    }
}

impl fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.error_code.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Assign,
    Unassign,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assign => write!(f, "ASSIGN"),
            Self::Unassign => write!(f, "UNASSIGN"),
        }
    }
}

/// What started the operation that last touched an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationTrigger {
    Membership,
    Finalize,
    Resync,
    Reset,
    FollowUp,
}

impl fmt::Display for OperationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Membership => "MEMBERSHIP",
            Self::Finalize => "FINALIZE",
            Self::Resync => "RESYNC",
            Self::Reset => "RESET",
            Self::FollowUp => "FOLLOW_UP",
        };
        f.write_str(name)
    }
}

/// The assign or unassign operation an assignment is correlated with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentOperation {
    /// Monotonic across the engine; part of the callback correlation key
    pub id: u64,
    pub kind: OperationKind,
    pub trigger: OperationTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AssignmentOperation {
    pub fn start(id: u64, kind: OperationKind, trigger: OperationTrigger) -> Self {
        Self {
            id,
            kind,
            trigger,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }
}

/// Tracked relationship between one ordered pair of participants within a formation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationAssignment {
    pub id: Uuid,
    pub tenant: String,
    pub key: AssignmentKey,
    pub state: AssignmentState,
    /// Opaque configuration produced by the target, consumed by the reverse notification
    pub value: Option<Value>,
    pub error: Option<AssignmentError>,
    pub last_operation: Option<AssignmentOperation>,
    /// An asynchronous request is outstanding for `last_operation`
    pub awaiting_callback: bool,
    /// Delivery is being held until the reverse assignment is ready
    pub deferred: bool,
    /// Reverse value carried by the last notification sent for this assignment
    pub notified_reverse_value: Option<Value>,
    /// Bumped on every write; compare-and-set token
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FormationAssignment {
    pub fn new(key: AssignmentKey, tenant: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant: tenant.into(),
            key,
            state: AssignmentState::Initial,
            value: None,
            error: None,
            last_operation: None,
            awaiting_callback: false,
            deferred: false,
            notified_reverse_value: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn formation_id(&self) -> Uuid {
        self.key.formation_id
    }

    pub fn source(&self) -> &str {
        &self.key.source
    }

    pub fn target(&self) -> &str {
        &self.key.target
    }

    pub fn is_self(&self) -> bool {
        self.key.is_self()
    }

    pub fn operation_id(&self) -> Option<u64> {
        self.last_operation.as_ref().map(|op| op.id)
    }

    pub fn operation_kind(&self) -> OperationKind {
        match &self.last_operation {
            Some(op) => op.kind,
            None if self.state.is_unassign_phase() => OperationKind::Unassign,
            None => OperationKind::Assign,
        }
    }

    /// Whether an operation is still open, so resync reuses its id
    pub fn has_open_operation(&self) -> bool {
        self.last_operation
            .as_ref()
            .map(AssignmentOperation::is_open)
            .unwrap_or(false)
    }
}

/// Audit record of one applied transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentTransition {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub formation_id: Uuid,
    pub from_state: Option<AssignmentState>,
    /// `None` when the transition removed the record
    pub to_state: Option<AssignmentState>,
    pub event: String,
    pub operation_id: Option<u64>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Treat `null`, `""`, `{}` and `[]` as "no configuration"
pub fn normalize_configuration(value: Option<Value>) -> Option<Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() || s.trim() == "{}" || s == "null" => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(Value::Array(items)) if items.is_empty() => None,
        Some(other) => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> AssignmentKey {
        AssignmentKey::new(
            Uuid::new_v4(),
            "app-a",
            ParticipantType::Application,
            "rt-b",
            ParticipantType::Runtime,
        )
    }

    #[test]
    fn test_reverse_key_swaps_sides() {
        let key = key();
        let reverse = key.reverse();
        assert_eq!(reverse.source, "rt-b");
        assert_eq!(reverse.target_type, ParticipantType::Application);
        assert_eq!(reverse.reverse(), key);
        assert!(!key.is_self());
    }

    #[test]
    fn test_self_assignment_key() {
        let key =
            AssignmentKey::self_assignment(Uuid::new_v4(), "app", ParticipantType::Application);
        assert!(key.is_self());
        assert_eq!(key.reverse(), key);
        assert!(key.involves("app"));
    }

    #[test]
    fn test_new_assignment_starts_initial() {
        let assignment = FormationAssignment::new(key(), "tenant");
        assert_eq!(assignment.state, AssignmentState::Initial);
        assert_eq!(assignment.version, 0);
        assert_eq!(assignment.operation_kind(), OperationKind::Assign);
        assert!(!assignment.has_open_operation());
    }

    #[test]
    fn test_normalize_configuration() {
        assert_eq!(normalize_configuration(Some(json!(null))), None);
        assert_eq!(normalize_configuration(Some(json!({}))), None);
        assert_eq!(normalize_configuration(Some(json!(""))), None);
        assert_eq!(normalize_configuration(Some(json!("{}"))), None);
        assert_eq!(
            normalize_configuration(Some(json!({"a": 1}))),
            Some(json!({"a": 1}))
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AssignmentError::technical("x").error_code.code(), 1);
        assert_eq!(AssignmentError::client("x").error_code.code(), 2);
    }
}
