//! Shared helpers for the integration suites: a scripted webhook client, builders for
//! participants and templates, and a harness wiring an engine over the in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

use formation_engine::config::EngineSettings;
use formation_engine::dispatch::{OutboundRequest, TransportError, WebhookClient, WebhookResponse};
use formation_engine::events::EventPublisher;
use formation_engine::models::{
    CreateFormationRequest, Formation, FormationAssignment, FormationTemplate, Participant,
    ParticipantType, Webhook, WebhookKind, WebhookMode,
};
use formation_engine::orchestration::{EngineStores, FormationEngine};
use formation_engine::state_machine::AssignmentState;

pub const TENANT: &str = "tenant-1";
pub const TEMPLATE_ID: &str = "default-template";

/// Body every test webhook sends; carries enough to correlate requests in assertions
pub const INPUT_TEMPLATE: &str = r#"{"operation": "{{ operation }}", "formation_id": "{{ formation.id }}", "source": "{{ source.id }}", "target": "{{ target.id }}", "assignment_id": "{{ assignment.id }}", "operation_id": {{ to_json(assignment.operation_id) }}, "reverse_config": {{ to_json(default(reverse_assignment.value, null)) }}}"#;

pub const LIFECYCLE_INPUT_TEMPLATE: &str =
    r#"{"operation": "{{ operation }}", "formation_id": "{{ formation.id }}", "name": "{{ formation.name }}"}"#;

type Scripted = Result<WebhookResponse, TransportError>;

/// Webhook client that records every request and answers from per-url scripts
#[derive(Debug, Default)]
pub struct RecordingWebhookClient {
    requests: Mutex<Vec<OutboundRequest>>,
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    defaults: Mutex<HashMap<String, Scripted>>,
}

impl RecordingWebhookClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next request to `url` with `response`
    pub fn respond(&self, url: &str, response: WebhookResponse) {
        self.queued
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(Ok(response));
    }

    /// Answer every request to `url` without a queued response with `response`
    pub fn set_default(&self, url: &str, response: WebhookResponse) {
        self.defaults.lock().insert(url.to_string(), Ok(response));
    }

    pub fn fail_with(&self, url: &str, error: TransportError) {
        self.defaults.lock().insert(url.to_string(), Err(error));
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<OutboundRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    /// Requests whose rendered body names the given source and target
    pub fn requests_for_pair(&self, source: &str, target: &str) -> Vec<OutboundRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.body["source"] == source && r.body["target"] == target)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

#[async_trait]
impl WebhookClient for RecordingWebhookClient {
    async fn send(&self, request: &OutboundRequest) -> Result<WebhookResponse, TransportError> {
        self.requests.lock().push(request.clone());

        if let Some(next) = self
            .queued
            .lock()
            .get_mut(&request.url)
            .and_then(VecDeque::pop_front)
        {
            return next;
        }
        self.defaults
            .lock()
            .get(&request.url)
            .cloned()
            .unwrap_or_else(|| Ok(WebhookResponse::new(200, json!({}))))
    }
}

pub fn url_for(participant_id: &str) -> String {
    format!("http://{participant_id}.example/notify")
}

pub fn url_template(url: &str) -> String {
    format!(r#"{{"method": "POST", "url": "{url}"}}"#)
}

pub fn webhook(kind: WebhookKind, mode: WebhookMode, url: &str) -> Webhook {
    Webhook::new(kind, mode, url_template(url), INPUT_TEMPLATE)
}

/// Application with a configuration-changed webhook at [`url_for`]
pub fn application(id: &str, mode: WebhookMode) -> Participant {
    Participant::new(id, ParticipantType::Application, TENANT).with_webhook(webhook(
        WebhookKind::ConfigurationChanged,
        mode,
        &url_for(id),
    ))
}

pub fn runtime(id: &str, mode: WebhookMode) -> Participant {
    Participant::new(id, ParticipantType::Runtime, TENANT).with_webhook(webhook(
        WebhookKind::ConfigurationChanged,
        mode,
        &url_for(id),
    ))
}

pub fn plain_template() -> FormationTemplate {
    FormationTemplate::new(TEMPLATE_ID, "Default")
}

pub fn lifecycle_template(id: &str, mode: WebhookMode, url: &str) -> FormationTemplate {
    FormationTemplate::new(id, "With lifecycle").with_webhook(Webhook::new(
        WebhookKind::FormationLifecycle,
        mode,
        url_template(url),
        LIFECYCLE_INPUT_TEMPLATE,
    ))
}

/// Engine over in-memory stores with a recording client
pub struct TestHarness {
    pub engine: FormationEngine,
    pub client: Arc<RecordingWebhookClient>,
}

impl TestHarness {
    pub async fn new() -> Self {
        let client = Arc::new(RecordingWebhookClient::new());
        let engine = FormationEngine::new(
            EngineStores::in_memory(),
            client.clone(),
            EventPublisher::new(1024),
            EngineSettings::default(),
        );
        engine
            .register_template(plain_template())
            .await
            .expect("register default template");
        Self { engine, client }
    }

    pub async fn register(&self, participant: Participant) -> Participant {
        self.engine
            .register_participant(participant)
            .await
            .expect("register participant")
    }

    pub async fn formation(&self) -> Formation {
        self.engine
            .create_formation(CreateFormationRequest::new("formation", TENANT, TEMPLATE_ID))
            .await
            .expect("create formation")
    }

    pub async fn assign(
        &self,
        formation_id: Uuid,
        participant: &Participant,
    ) -> Vec<FormationAssignment> {
        self.engine
            .assign_participant(formation_id, &participant.id, participant.participant_type)
            .await
            .expect("assign participant")
    }

    pub async fn unassign(
        &self,
        formation_id: Uuid,
        participant: &Participant,
    ) -> Vec<FormationAssignment> {
        self.engine
            .unassign_participant(formation_id, &participant.id, participant.participant_type)
            .await
            .expect("unassign participant")
    }

    pub async fn assignments(&self, formation_id: Uuid) -> Vec<FormationAssignment> {
        self.engine
            .list_assignments(formation_id)
            .await
            .expect("list assignments")
    }

    pub async fn assignment(
        &self,
        formation_id: Uuid,
        source: &str,
        target: &str,
    ) -> Option<FormationAssignment> {
        self.assignments(formation_id)
            .await
            .into_iter()
            .find(|a| a.source() == source && a.target() == target)
    }

    pub async fn state_of(
        &self,
        formation_id: Uuid,
        source: &str,
        target: &str,
    ) -> Option<AssignmentState> {
        self.assignment(formation_id, source, target)
            .await
            .map(|a| a.state)
    }
}

pub fn ok(body: Value) -> WebhookResponse {
    WebhookResponse::new(200, body)
}

pub fn accepted() -> WebhookResponse {
    WebhookResponse::new(202, json!({}))
}
