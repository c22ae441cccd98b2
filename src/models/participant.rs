use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::webhook::{Webhook, WebhookKind};

/// Label holding the scenario groups a participant belongs to
pub const SCENARIO_GROUPS_LABEL: &str = "scenario_groups";

/// Kinds of entity that can take part in a formation or hold a webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantType {
    Application,
    ApplicationTemplate,
    Runtime,
    RuntimeContext,
    Formation,
    FormationTemplate,
}

impl ParticipantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "APPLICATION",
            Self::ApplicationTemplate => "APPLICATION_TEMPLATE",
            Self::Runtime => "RUNTIME",
            Self::RuntimeContext => "RUNTIME_CONTEXT",
            Self::Formation => "FORMATION",
            Self::FormationTemplate => "FORMATION_TEMPLATE",
        }
    }

    /// Types that can be assigned into a formation
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Self::Application | Self::Runtime | Self::RuntimeContext
        )
    }
}

impl fmt::Display for ParticipantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ParticipantType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "APPLICATION" => Ok(Self::Application),
            "APPLICATION_TEMPLATE" => Ok(Self::ApplicationTemplate),
            "RUNTIME" => Ok(Self::Runtime),
            "RUNTIME_CONTEXT" => Ok(Self::RuntimeContext),
            "FORMATION" => Ok(Self::Formation),
            "FORMATION_TEMPLATE" => Ok(Self::FormationTemplate),
            _ => Err(format!("Invalid participant type: {s}")),
        }
    }
}

/// Descriptor of a participant as supplied by the management layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub tenant: String,
    #[serde(default)]
    pub local_tenant_id: Option<String>,
    #[serde(rename = "type")]
    pub participant_type: ParticipantType,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, Value>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
}

impl Participant {
    pub fn new(
        id: impl Into<String>,
        participant_type: ParticipantType,
        tenant: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tenant: tenant.into(),
            local_tenant_id: None,
            participant_type,
            subtype: None,
            labels: BTreeMap::new(),
            base_url: None,
            webhooks: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    pub fn with_local_tenant_id(mut self, local_tenant_id: impl Into<String>) -> Self {
        self.local_tenant_id = Some(local_tenant_id.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: Value) -> Self {
        self.labels.insert(key.into(), value);
        self
    }

    pub fn with_webhook(mut self, webhook: Webhook) -> Self {
        self.webhooks.push(webhook);
        self
    }

    pub fn webhook(&self, kind: WebhookKind) -> Option<&Webhook> {
        self.webhooks.iter().find(|w| w.kind == kind)
    }

    /// Webhook that receives assignment notifications where this participant is the target.
    ///
    /// Application-to-application pairs prefer the tenant mapping webhook when it exists.
    pub fn notification_webhook(&self, source_type: ParticipantType) -> Option<&Webhook> {
        if source_type == ParticipantType::Application
            && self.participant_type == ParticipantType::Application
        {
            if let Some(webhook) = self.webhook(WebhookKind::ApplicationTenantMapping) {
                return Some(webhook);
            }
        }
        self.webhook(WebhookKind::ConfigurationChanged)
    }

    /// Scenario groups from the `scenario_groups` label; accepts a string or an array of strings
    pub fn scenario_groups(&self) -> Vec<String> {
        match self.labels.get(SCENARIO_GROUPS_LABEL) {
            Some(Value::String(group)) => vec![group.clone()],
            Some(Value::Array(groups)) => groups
                .iter()
                .filter_map(|g| g.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn subtype_or_empty(&self) -> &str {
        self.subtype.as_deref().unwrap_or("")
    }
}
