use dashmap::DashMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::context::{ContextShape, ResponseContext, TemplateContext};
use super::template::Template;
use super::{RenderError, RenderResult};
use crate::constants::{DEFAULT_INCOMPLETE_STATUS_CODE, DEFAULT_SUCCESS_STATUS_CODE};
use crate::models::{Destination, Notification, Webhook};

/// Compiled output template of a webhook, evaluated against the response
#[derive(Debug, Clone)]
pub struct OutputRule {
    template: Arc<Template>,
}

/// What an output template extracted from a response
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseOutcome {
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default, deserialize_with = "deserialize_error")]
    pub error: Option<String>,
    #[serde(default = "default_success")]
    pub success_status_code: u16,
    #[serde(default = "default_incomplete")]
    pub incomplete_status_code: u16,
}

fn default_success() -> u16 {
    DEFAULT_SUCCESS_STATUS_CODE
}

fn default_incomplete() -> u16 {
    DEFAULT_INCOMPLETE_STATUS_CODE
}

// Receivers send either a message string or a structured error object
fn deserialize_error<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(other) => Some(other.to_string()),
    })
}

impl OutputRule {
    pub fn new(template: Arc<Template>) -> Self {
        Self { template }
    }

    pub fn parse(source: &str) -> RenderResult<Self> {
        Ok(Self::new(Arc::new(Template::parse(source)?)))
    }

    pub fn source(&self) -> &str {
        self.template.source()
    }

    pub fn evaluate(&self, response: &ResponseContext) -> RenderResult<ResponseOutcome> {
        let rendered = self.template.render_json(response, "output")?;
        serde_json::from_value(rendered).map_err(|e| RenderError::invalid_json("output", e))
    }
}

/// Addressing fields of a notification that do not come from templates
#[derive(Debug, Clone)]
pub struct NotificationTarget {
    pub formation_id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub receiver: String,
    pub receiver_tenant: String,
}

/// Compiles templates once per source text and renders notifications from them
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    cache: DashMap<String, Arc<Template>>,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, source: &str) -> RenderResult<Arc<Template>> {
        if let Some(template) = self.cache.get(source) {
            return Ok(Arc::clone(&template));
        }
        let template = Arc::new(Template::parse(source)?);
        self.cache
            .insert(source.to_string(), Arc::clone(&template));
        Ok(template)
    }

    pub fn cached_templates(&self) -> usize {
        self.cache.len()
    }

    /// Render an arbitrary JSON artifact, such as a constraint input
    pub fn render_value(
        &self,
        source: &str,
        ctx: &TemplateContext,
        artifact: &str,
    ) -> RenderResult<Value> {
        self.compile(source)?.render_json(ctx, artifact)
    }

    /// Build the outbound notification for a webhook; fails without side effects
    pub fn render_notification(
        &self,
        webhook: &Webhook,
        ctx: &TemplateContext,
        target: NotificationTarget,
    ) -> RenderResult<Notification> {
        let destination_value = self.compile(&webhook.url_template)?.render_json(ctx, "url")?;
        let destination: Destination = serde_json::from_value(destination_value)
            .map_err(|e| RenderError::invalid_json("url", e))?;

        let header_value = self
            .compile(webhook.header_template())?
            .render_json(ctx, "header")?;
        let headers = header_map(header_value)?;

        let body = self
            .compile(&webhook.input_template)?
            .render_json(ctx, "input")?;

        let output_rule = OutputRule::new(self.compile(webhook.output_template())?);

        Ok(Notification {
            formation_id: target.formation_id,
            assignment_id: target.assignment_id,
            operation: ctx.operation,
            webhook_id: webhook.id,
            webhook_kind: webhook.kind,
            mode: webhook.mode,
            destination,
            headers,
            body,
            output_rule,
            receiver: target.receiver,
            receiver_tenant: target.receiver_tenant,
        })
    }

    /// Parse every template of a webhook and check its field references
    pub fn validate_webhook(&self, webhook: &Webhook) -> RenderResult<()> {
        for source in [
            webhook.url_template.as_str(),
            webhook.header_template(),
            webhook.input_template.as_str(),
        ] {
            self.compile(source)?
                .check_paths(ContextShape::Notification)?;
        }
        self.compile(webhook.output_template())?
            .check_paths(ContextShape::Response)
    }
}

fn header_map(value: Value) -> RenderResult<BTreeMap<String, String>> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(name, v)| {
                let text = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (name, text)
            })
            .collect()),
        Value::Null => Ok(BTreeMap::new()),
        other => Err(RenderError::invalid_json(
            "header",
            format!("expected an object, got {other}"),
        )),
    }
}
