use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::formation_assignment::OperationKind;
use super::webhook::{WebhookKind, WebhookMode};
use crate::templates::OutputRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationOperation {
    Assign,
    Unassign,
    CreateFormation,
    DeleteFormation,
}

impl NotificationOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Unassign => "unassign",
            Self::CreateFormation => "create_formation",
            Self::DeleteFormation => "delete_formation",
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, Self::Unassign | Self::DeleteFormation)
    }
}

impl From<OperationKind> for NotificationOperation {
    fn from(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Assign => Self::Assign,
            OperationKind::Unassign => Self::Unassign,
        }
    }
}

impl fmt::Display for NotificationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a notification is delivered; rendered from a url template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(alias = "path")]
    pub url: String,
}

fn default_method() -> String {
    "POST".to_string()
}

impl Destination {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// Transient outbound notification, derived deterministically from the render context
#[derive(Debug, Clone)]
pub struct Notification {
    pub formation_id: Uuid,
    /// `None` for formation lifecycle notifications
    pub assignment_id: Option<Uuid>,
    pub operation: NotificationOperation,
    pub webhook_id: Uuid,
    pub webhook_kind: WebhookKind,
    pub mode: WebhookMode,
    pub destination: Destination,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub output_rule: OutputRule,
    /// Participant that owns the webhook
    pub receiver: String,
    pub receiver_tenant: String,
}

impl Notification {
    pub fn is_async(&self) -> bool {
        self.mode == WebhookMode::AsyncCallback
    }
}
