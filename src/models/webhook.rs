use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Output rule used when a webhook does not register its own output template
pub const DEFAULT_OUTPUT_TEMPLATE: &str = r#"{"config": {{ to_json(body.config) }}, "state": {{ to_json(body.state) }}, "error": {{ to_json(body.error) }}, "success_status_code": 200, "incomplete_status_code": 204}"#;

/// Headers sent when a webhook does not register its own header template
pub const DEFAULT_HEADER_TEMPLATE: &str = r#"{"Content-Type": "application/json"}"#;

/// What kind of lifecycle a webhook is notified about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookKind {
    /// Generic assignment notifications
    ConfigurationChanged,
    /// Application-to-application tenant mapping notifications
    ApplicationTenantMapping,
    /// Formation create/delete notifications
    FormationLifecycle,
}

impl fmt::Display for WebhookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigurationChanged => write!(f, "CONFIGURATION_CHANGED"),
            Self::ApplicationTenantMapping => write!(f, "APPLICATION_TENANT_MAPPING"),
            Self::FormationLifecycle => write!(f, "FORMATION_LIFECYCLE"),
        }
    }
}

/// Whether the immediate HTTP response carries the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookMode {
    /// Response carries the final outcome
    #[default]
    Sync,
    /// Response only acknowledges; the outcome arrives through a status report
    AsyncCallback,
}

impl fmt::Display for WebhookMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "SYNC"),
            Self::AsyncCallback => write!(f, "ASYNC_CALLBACK"),
        }
    }
}

/// A webhook registered by a participant or formation template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub kind: WebhookKind,
    #[serde(default)]
    pub mode: WebhookMode,
    /// Renders to `{"method": ..., "url": ...}`
    pub url_template: String,
    /// Renders to the JSON request body
    pub input_template: String,
    /// Renders to a JSON object of header values
    #[serde(default)]
    pub header_template: Option<String>,
    /// Rendered against the response to produce the outcome
    #[serde(default)]
    pub output_template: Option<String>,
}

impl Webhook {
    pub fn new(
        kind: WebhookKind,
        mode: WebhookMode,
        url_template: impl Into<String>,
        input_template: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            mode,
            url_template: url_template.into(),
            input_template: input_template.into(),
            header_template: None,
            output_template: None,
        }
    }

    pub fn with_header_template(mut self, template: impl Into<String>) -> Self {
        self.header_template = Some(template.into());
        self
    }

    pub fn with_output_template(mut self, template: impl Into<String>) -> Self {
        self.output_template = Some(template.into());
        self
    }

    pub fn header_template(&self) -> &str {
        self.header_template
            .as_deref()
            .unwrap_or(DEFAULT_HEADER_TEMPLATE)
    }

    pub fn output_template(&self) -> &str {
        self.output_template
            .as_deref()
            .unwrap_or(DEFAULT_OUTPUT_TEMPLATE)
    }

    pub fn is_async(&self) -> bool {
        self.mode == WebhookMode::AsyncCallback
    }
}
