//! Typed render contexts.
//!
//! [`TemplateContext`] carries the participants, formation and assignments a notification
//! or constraint input is rendered against. [`ResponseContext`] carries a webhook
//! response for output templates. Both resolve dotted paths through [`Resolve`].

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::expression::Resolve;
use super::{RenderError, RenderResult};
use crate::models::{
    Formation, FormationAssignment, JoinPoint, NotificationOperation, Participant,
    ParticipantType, StatusReport,
};
use crate::state_machine::states::{AssignmentState, FormationState};

const PARTICIPANT_FIELDS: &[&str] = &[
    "id",
    "name",
    "type",
    "subtype",
    "tenant",
    "local_tenant_id",
    "base_url",
    "labels",
];
const FORMATION_FIELDS: &[&str] = &["id", "name", "tenant", "template_id", "state"];
const ASSIGNMENT_FIELDS: &[&str] = &["id", "state", "value", "operation_id", "source", "target"];
const REVERSE_FIELDS: &[&str] = &["id", "state", "value"];
const CUSTOMER_FIELDS: &[&str] = &["tenant_id", "customer_id"];
const RESOURCE_FIELDS: &[&str] = &["type", "subtype", "id"];
const STATUS_REPORT_FIELDS: &[&str] = &["state", "configuration", "error"];

/// Which context a template will be rendered against, for static path validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextShape {
    /// Webhook url, header and input templates
    Notification,
    /// Constraint input templates; a superset of `Notification`
    Constraint,
    /// Webhook output templates
    Response,
}

// Fields that carry free-form JSON and may be descended into
fn is_open_field(root: &str, field: &str) -> bool {
    matches!(
        (root, field),
        ("source" | "target" | "participant", "labels")
            | ("assignment" | "reverse_assignment", "value")
            | ("status_report", "configuration")
    )
}

fn fields_of(root: &str, shape: ContextShape) -> Option<&'static [&'static str]> {
    let common = match root {
        "source" | "target" => Some(PARTICIPANT_FIELDS),
        "formation" => Some(FORMATION_FIELDS),
        "assignment" => Some(ASSIGNMENT_FIELDS),
        "reverse_assignment" => Some(REVERSE_FIELDS),
        "customer" => Some(CUSTOMER_FIELDS),
        _ => None,
    };
    if common.is_some() || shape != ContextShape::Constraint {
        return common;
    }
    match root {
        "participant" => Some(PARTICIPANT_FIELDS),
        "resource" => Some(RESOURCE_FIELDS),
        "status_report" => Some(STATUS_REPORT_FIELDS),
        _ => None,
    }
}

impl ContextShape {
    pub fn is_known(&self, path: &[String]) -> bool {
        let Some(root) = path.first().map(String::as_str) else {
            return false;
        };

        if *self == Self::Response {
            return match root {
                "status_code" => path.len() == 1,
                "headers" => path.len() <= 2,
                "body" => true,
                _ => false,
            };
        }

        match root {
            "operation" => return path.len() == 1,
            "join_point" => return *self == Self::Constraint && path.len() == 1,
            _ => {}
        }

        let Some(fields) = fields_of(root, *self) else {
            return false;
        };
        match path.get(1).map(String::as_str) {
            None => true,
            Some(field) if !fields.contains(&field) => false,
            Some(field) => path.len() == 2 || is_open_field(root, field),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantView {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub participant_type: ParticipantType,
    pub subtype: Option<String>,
    pub tenant: String,
    pub local_tenant_id: Option<String>,
    pub base_url: Option<String>,
    pub labels: BTreeMap<String, Value>,
}

impl From<&Participant> for ParticipantView {
    fn from(participant: &Participant) -> Self {
        Self {
            id: participant.id.clone(),
            name: participant.name.clone(),
            participant_type: participant.participant_type,
            subtype: participant.subtype.clone(),
            tenant: participant.tenant.clone(),
            local_tenant_id: participant.local_tenant_id.clone(),
            base_url: participant.base_url.clone(),
            labels: participant.labels.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationView {
    pub id: Uuid,
    pub name: String,
    pub tenant: String,
    pub template_id: String,
    pub state: FormationState,
}

impl From<&Formation> for FormationView {
    fn from(formation: &Formation) -> Self {
        Self {
            id: formation.id,
            name: formation.name.clone(),
            tenant: formation.tenant.clone(),
            template_id: formation.template_id.clone(),
            state: formation.state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentView {
    pub id: Uuid,
    pub state: AssignmentState,
    pub value: Option<Value>,
    pub operation_id: Option<u64>,
    pub source: String,
    pub target: String,
}

impl From<&FormationAssignment> for AssignmentView {
    fn from(assignment: &FormationAssignment) -> Self {
        Self {
            id: assignment.id,
            state: assignment.state,
            value: assignment.value.clone(),
            operation_id: assignment.operation_id(),
            source: assignment.source().to_string(),
            target: assignment.target().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerView {
    pub tenant_id: String,
    pub customer_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceView {
    #[serde(rename = "type")]
    pub resource_type: ParticipantType,
    pub subtype: Option<String>,
    pub id: String,
}

impl From<&Formation> for ResourceView {
    fn from(formation: &Formation) -> Self {
        Self {
            resource_type: ParticipantType::Formation,
            subtype: Some(formation.template_id.clone()),
            id: formation.id.to_string(),
        }
    }
}

impl From<&Participant> for ResourceView {
    fn from(participant: &Participant) -> Self {
        Self {
            resource_type: participant.participant_type,
            subtype: participant.subtype.clone(),
            id: participant.id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReportView {
    pub state: AssignmentState,
    pub configuration: Option<Value>,
    pub error: Option<String>,
}

impl From<&StatusReport> for StatusReportView {
    fn from(report: &StatusReport) -> Self {
        Self {
            state: report.state,
            configuration: report.configuration.clone(),
            error: report.error.clone(),
        }
    }
}

/// Context for webhook request templates and constraint inputs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateContext {
    pub operation: NotificationOperation,
    pub formation: Option<FormationView>,
    pub source: Option<ParticipantView>,
    pub target: Option<ParticipantView>,
    pub assignment: Option<AssignmentView>,
    pub reverse_assignment: Option<AssignmentView>,
    pub customer: Option<CustomerView>,
    pub join_point: Option<JoinPoint>,
    pub participant: Option<ParticipantView>,
    pub resource: Option<ResourceView>,
    pub status_report: Option<StatusReportView>,
}

impl TemplateContext {
    pub fn new(operation: NotificationOperation) -> Self {
        Self {
            operation,
            formation: None,
            source: None,
            target: None,
            assignment: None,
            reverse_assignment: None,
            customer: None,
            join_point: None,
            participant: None,
            resource: None,
            status_report: None,
        }
    }

    pub fn with_formation(mut self, formation: &Formation) -> Self {
        self.formation = Some(formation.into());
        self
    }

    pub fn with_source(mut self, participant: &Participant) -> Self {
        self.source = Some(participant.into());
        self
    }

    pub fn with_target(mut self, participant: &Participant) -> Self {
        self.target = Some(participant.into());
        self
    }

    pub fn with_assignment(mut self, assignment: &FormationAssignment) -> Self {
        self.assignment = Some(assignment.into());
        self
    }

    pub fn with_reverse_assignment(mut self, reverse: Option<&FormationAssignment>) -> Self {
        self.reverse_assignment = reverse.map(AssignmentView::from);
        self
    }

    pub fn with_customer(
        mut self,
        tenant_id: impl Into<String>,
        customer_id: Option<String>,
    ) -> Self {
        self.customer = Some(CustomerView {
            tenant_id: tenant_id.into(),
            customer_id,
        });
        self
    }

    pub fn with_join_point(mut self, join_point: JoinPoint) -> Self {
        self.join_point = Some(join_point);
        self
    }

    pub fn with_participant(mut self, participant: &Participant) -> Self {
        self.participant = Some(participant.into());
        self
    }

    pub fn with_resource(mut self, resource: ResourceView) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_status_report(mut self, report: &StatusReport) -> Self {
        self.status_report = Some(report.into());
        self
    }

    fn root(&self, name: &str) -> RenderResult<Option<Value>> {
        fn view<T: Serialize>(view: &Option<T>) -> RenderResult<Option<Value>> {
            view.as_ref()
                .map(serde_json::to_value)
                .transpose()
                .map_err(|e| RenderError::invalid_json("context", e))
        }

        match name {
            "operation" => Ok(Some(Value::String(self.operation.as_str().to_string()))),
            "join_point" => Ok(self
                .join_point
                .map(|jp| Value::String(jp.as_str().to_string()))),
            "formation" => view(&self.formation),
            "source" => view(&self.source),
            "target" => view(&self.target),
            "assignment" => view(&self.assignment),
            "reverse_assignment" => view(&self.reverse_assignment),
            "customer" => view(&self.customer),
            "participant" => view(&self.participant),
            "resource" => view(&self.resource),
            "status_report" => view(&self.status_report),
            _ => Ok(None),
        }
    }
}

/// Walk into a JSON value; an absent key is a missing field
fn descend(root: Value, rest: &[String], path: &[String]) -> RenderResult<Value> {
    let mut current = root;
    for segment in rest {
        current = match current {
            Value::Object(mut map) => map
                .remove(segment)
                .ok_or_else(|| RenderError::missing(path))?,
            _ => return Err(RenderError::missing(path)),
        };
    }
    Ok(current)
}

impl Resolve for TemplateContext {
    fn resolve(&self, path: &[String]) -> RenderResult<Value> {
        if !ContextShape::Constraint.is_known(path) {
            return Err(RenderError::unknown(path));
        }
        let root = self
            .root(&path[0])?
            .ok_or_else(|| RenderError::missing(&path[..1]))?;
        descend(root, &path[1..], path)
    }
}

/// A webhook response as seen by output templates
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseContext {
    pub status_code: u16,
    /// Header names are stored lowercase
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl ResponseContext {
    pub fn new(status_code: u16, headers: BTreeMap<String, String>, body: Value) -> Self {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        Self {
            status_code,
            headers,
            body,
        }
    }
}

impl Resolve for ResponseContext {
    // Missing response keys resolve to null
    fn resolve(&self, path: &[String]) -> RenderResult<Value> {
        if !ContextShape::Response.is_known(path) {
            return Err(RenderError::unknown(path));
        }
        match path[0].as_str() {
            "status_code" => Ok(Value::from(self.status_code)),
            "headers" => match path.get(1) {
                None => Ok(serde_json::json!(self.headers)),
                Some(name) => Ok(self
                    .headers
                    .get(&name.to_ascii_lowercase())
                    .map(|v| Value::String(v.clone()))
                    .unwrap_or(Value::Null)),
            },
            _ => {
                let mut current = &self.body;
                for segment in &path[1..] {
                    match current.get(segment) {
                        Some(next) => current = next,
                        None => return Ok(Value::Null),
                    }
                }
                Ok(current.clone())
            }
        }
    }
}
