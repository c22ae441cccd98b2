use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use super::{
    actions::{LogTransitionAction, PublishTransitionEventAction, StateAction},
    errors::{StateMachineError, StateMachineResult},
    events::AssignmentEvent,
    persistence::{AssignmentTransitionPersistence, TransitionPersistence},
    states::AssignmentState,
};
use crate::events::publisher::EventPublisher;
use crate::models::{normalize_configuration, FormationAssignment};
use crate::store::AssignmentStore;

/// Result of an applied assignment transition
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Updated(FormationAssignment),
    /// The record was deleted; carries its last stored value
    Removed(FormationAssignment),
}

impl TransitionOutcome {
    pub fn assignment(&self) -> &FormationAssignment {
        match self {
            Self::Updated(assignment) | Self::Removed(assignment) => assignment,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed(_))
    }
}

/// Authoritative per-pair lifecycle; every write is a compare-and-set on the version read
pub struct AssignmentStateMachine {
    persistence: AssignmentTransitionPersistence,
    event_publisher: EventPublisher,
}

impl std::fmt::Debug for AssignmentStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentStateMachine").finish_non_exhaustive()
    }
}

impl AssignmentStateMachine {
    pub fn new(store: Arc<dyn AssignmentStore>, event_publisher: EventPublisher) -> Self {
        Self {
            persistence: AssignmentTransitionPersistence::new(store),
            event_publisher,
        }
    }

    /// Target state for an event; `None` means the record is removed
    pub fn determine_target_state(
        current_state: AssignmentState,
        event: &AssignmentEvent,
    ) -> StateMachineResult<Option<AssignmentState>> {
        use AssignmentState::*;

        let target = match (current_state, event) {
            // Creation path
            (Initial | ConfigPending | CreateReady, AssignmentEvent::Complete(_)) => Some(Ready),
            (Initial | ConfigPending, AssignmentEvent::MarkConfigPending(_)) => Some(ConfigPending),
            (Initial | ConfigPending | CreateReady, AssignmentEvent::ConfirmCreate(_)) => {
                Some(CreateReady)
            }
            (Initial | ConfigPending | CreateReady, AssignmentEvent::FailCreate(_)) => {
                Some(CreateError)
            }

            // Removal path
            (
                Initial | ConfigPending | Ready | CreateError | CreateReady,
                AssignmentEvent::BeginDelete,
            ) => Some(Deleting),
            (Deleting | DeleteReady, AssignmentEvent::ConfirmDelete) => Some(DeleteReady),
            (Deleting | DeleteReady, AssignmentEvent::FailDelete(_)) => Some(DeleteError),
            (Deleting | DeleteReady, AssignmentEvent::Remove) => None,

            // Recovery
            (CreateError, AssignmentEvent::Retry) => Some(Initial),
            (DeleteError, AssignmentEvent::Retry) => Some(Deleting),
            (Ready | CreateError, AssignmentEvent::Renotify) => Some(Initial),
            (Ready, AssignmentEvent::Reset { state, .. })
                if matches!(state, Ready | ConfigPending) =>
            {
                Some(*state)
            }

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply an event to the assignment as it was read
    pub async fn transition(
        &self,
        assignment: &FormationAssignment,
        event: AssignmentEvent,
    ) -> StateMachineResult<TransitionOutcome> {
        let from_state = assignment.state;
        let target_state = Self::determine_target_state(from_state, &event)?;
        let updated = target_state.map(|state| apply_event(assignment.clone(), state, &event));

        let metadata = json!({
            "error": event.error().map(|e| e.message.clone()),
            "has_configuration": event.configuration().is_some(),
        });
        let written = self
            .persistence
            .persist_transition(assignment, updated, event.event_type(), metadata)
            .await?;

        let outcome = match written {
            Some(updated) => TransitionOutcome::Updated(updated),
            None => TransitionOutcome::Removed(assignment.clone()),
        };

        self.execute_actions(
            outcome.assignment(),
            from_state,
            target_state,
            event.event_type(),
        )
        .await?;

        Ok(outcome)
    }

    /// Write bookkeeping fields without a state change
    pub async fn update_fields(
        &self,
        assignment: &FormationAssignment,
        updated: FormationAssignment,
    ) -> StateMachineResult<FormationAssignment> {
        if updated.state != assignment.state {
            return Err(StateMachineError::Internal(format!(
                "field update of {} attempted a state change",
                assignment.id
            )));
        }
        Ok(self.persistence.persist_fields(assignment, updated).await?)
    }

    async fn execute_actions(
        &self,
        assignment: &FormationAssignment,
        from_state: AssignmentState,
        to_state: Option<AssignmentState>,
        event: &str,
    ) -> StateMachineResult<()> {
        let actions: Vec<Box<dyn StateAction<FormationAssignment>>> = vec![
            Box::new(LogTransitionAction),
            Box::new(PublishTransitionEventAction::new(
                self.event_publisher.clone(),
            )),
        ];

        for action in actions {
            action
                .execute(
                    assignment,
                    Some(from_state.to_string()),
                    to_state.map(|s| s.to_string()),
                    event,
                )
                .await?;
        }

        Ok(())
    }
}

fn apply_event(
    mut assignment: FormationAssignment,
    target_state: AssignmentState,
    event: &AssignmentEvent,
) -> FormationAssignment {
    assignment.state = target_state;

    match event {
        AssignmentEvent::Complete(config)
        | AssignmentEvent::MarkConfigPending(config)
        | AssignmentEvent::ConfirmCreate(config) => {
            // An absent configuration keeps what is stored
            if let Some(config) = normalize_configuration(config.clone()) {
                assignment.value = Some(config);
            }
            assignment.error = None;
        }
        AssignmentEvent::FailCreate(error) | AssignmentEvent::FailDelete(error) => {
            assignment.error = Some(error.clone());
        }
        AssignmentEvent::Reset { configuration, .. } => {
            assignment.value = normalize_configuration(Some(configuration.clone()));
            assignment.error = None;
        }
        AssignmentEvent::BeginDelete
        | AssignmentEvent::Retry
        | AssignmentEvent::Renotify
        | AssignmentEvent::ConfirmDelete
        | AssignmentEvent::Remove => {
            assignment.error = None;
        }
    }

    // Intermediate states keep the operation open for a later report
    if !matches!(
        event,
        AssignmentEvent::MarkConfigPending(_)
            | AssignmentEvent::ConfirmCreate(_)
            | AssignmentEvent::ConfirmDelete
    ) {
        assignment.awaiting_callback = false;
    }
    if matches!(target_state, AssignmentState::Ready) || target_state.is_error() {
        if let Some(operation) = assignment.last_operation.as_mut() {
            operation.finished_at.get_or_insert_with(Utc::now);
        }
    }

    assignment
}
