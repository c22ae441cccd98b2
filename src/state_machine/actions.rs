use async_trait::async_trait;
use serde_json::{json, Value};

use super::errors::{ActionError, ActionResult};
use crate::constants::events;
use crate::events::publisher::EventPublisher;
use crate::logging::{log_assignment_transition, log_formation_operation};
use crate::models::{Formation, FormationAssignment};

/// Trait for implementing state transition actions
#[async_trait]
pub trait StateAction<T: Sync>: Send + Sync {
    /// Execute the action; `to_state` is `None` when the entity was removed
    async fn execute(
        &self,
        entity: &T,
        from_state: Option<String>,
        to_state: Option<String>,
        event: &str,
    ) -> ActionResult<()>;

    /// Get a description of this action for logging
    fn description(&self) -> &'static str;
}

/// Action to publish lifecycle events when state transitions occur
pub struct PublishTransitionEventAction {
    event_publisher: EventPublisher,
}

impl PublishTransitionEventAction {
    pub fn new(event_publisher: EventPublisher) -> Self {
        Self { event_publisher }
    }
}

#[async_trait]
impl StateAction<FormationAssignment> for PublishTransitionEventAction {
    async fn execute(
        &self,
        assignment: &FormationAssignment,
        from_state: Option<String>,
        to_state: Option<String>,
        event: &str,
    ) -> ActionResult<()> {
        let event_name = if to_state.is_some() {
            events::ASSIGNMENT_TRANSITIONED
        } else {
            events::ASSIGNMENT_REMOVED
        };
        let context = build_assignment_event_context(assignment, &from_state, &to_state, event);

        self.event_publisher
            .publish(event_name, context)
            .await
            .map_err(|_| ActionError::EventPublishFailed {
                event_name: event_name.to_string(),
            })
    }

    fn description(&self) -> &'static str {
        "Publish lifecycle event for assignment transition"
    }
}

#[async_trait]
impl StateAction<Formation> for PublishTransitionEventAction {
    async fn execute(
        &self,
        formation: &Formation,
        from_state: Option<String>,
        to_state: Option<String>,
        event: &str,
    ) -> ActionResult<()> {
        let context = json!({
            "formation_id": formation.id,
            "name": formation.name,
            "tenant": formation.tenant,
            "from_state": from_state,
            "to_state": to_state,
            "event": event,
        });

        self.event_publisher
            .publish(events::FORMATION_STATE_CHANGED, context)
            .await
            .map_err(|_| ActionError::EventPublishFailed {
                event_name: events::FORMATION_STATE_CHANGED.to_string(),
            })
    }

    fn description(&self) -> &'static str {
        "Publish lifecycle event for formation transition"
    }
}

/// Structured log line per applied transition
pub struct LogTransitionAction;

#[async_trait]
impl StateAction<FormationAssignment> for LogTransitionAction {
    async fn execute(
        &self,
        assignment: &FormationAssignment,
        from_state: Option<String>,
        to_state: Option<String>,
        event: &str,
    ) -> ActionResult<()> {
        log_assignment_transition(
            assignment.id,
            assignment.formation_id(),
            from_state.as_deref().unwrap_or("<none>"),
            to_state.as_deref(),
            event,
            assignment.operation_id(),
        );
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Log assignment transition"
    }
}

#[async_trait]
impl StateAction<Formation> for LogTransitionAction {
    async fn execute(
        &self,
        formation: &Formation,
        from_state: Option<String>,
        to_state: Option<String>,
        event: &str,
    ) -> ActionResult<()> {
        let details = format!(
            "{} -> {}",
            from_state.as_deref().unwrap_or("<none>"),
            to_state.as_deref().unwrap_or("<removed>")
        );
        log_formation_operation(event, formation.id, None, "transitioned", Some(&details));
        Ok(())
    }

    fn description(&self) -> &'static str {
        "Log formation transition"
    }
}

fn build_assignment_event_context(
    assignment: &FormationAssignment,
    from_state: &Option<String>,
    to_state: &Option<String>,
    event: &str,
) -> Value {
    json!({
        "assignment_id": assignment.id,
        "formation_id": assignment.formation_id(),
        "source": assignment.source(),
        "target": assignment.target(),
        "from_state": from_state,
        "to_state": to_state,
        "event": event,
        "operation_id": assignment.operation_id(),
        "error": assignment.error.as_ref().map(|e| e.message.clone()),
    })
}
