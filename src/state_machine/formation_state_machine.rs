use std::sync::Arc;

use super::{
    actions::{LogTransitionAction, PublishTransitionEventAction, StateAction},
    errors::{StateMachineError, StateMachineResult},
    events::FormationEvent,
    persistence::{FormationTransitionPersistence, TransitionPersistence},
    states::FormationState,
};
use crate::events::publisher::EventPublisher;
use crate::models::Formation;
use crate::store::FormationStore;

/// Formation-level lifecycle, driven by management calls and lifecycle webhook outcomes
pub struct FormationStateMachine {
    persistence: FormationTransitionPersistence,
    event_publisher: EventPublisher,
}

impl std::fmt::Debug for FormationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormationStateMachine").finish_non_exhaustive()
    }
}

impl FormationStateMachine {
    pub fn new(store: Arc<dyn FormationStore>, event_publisher: EventPublisher) -> Self {
        Self {
            persistence: FormationTransitionPersistence::new(store),
            event_publisher,
        }
    }

    /// Target state for an event; `None` means the formation is removed
    pub fn determine_target_state(
        current_state: FormationState,
        event: &FormationEvent,
    ) -> StateMachineResult<Option<FormationState>> {
        use FormationState::*;

        let target = match (current_state, event) {
            (Draft, FormationEvent::Finalize) => Some(Initial),
            (Initial, FormationEvent::LifecycleSucceeded) => Some(Ready),
            (Initial, FormationEvent::LifecycleFailed(_)) => Some(CreateError),
            (CreateError, FormationEvent::Retry) => Some(Initial),

            // Drafts were never announced, so there is no delete notification to wait for
            (Draft, FormationEvent::BeginDelete) => None,
            (Initial | Ready | CreateError, FormationEvent::BeginDelete) => Some(Deleting),
            (Deleting, FormationEvent::LifecycleSucceeded) => None,
            (Deleting, FormationEvent::LifecycleFailed(_)) => Some(DeleteError),
            (DeleteError, FormationEvent::Retry) => Some(Deleting),

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: Some(from_state.to_string()),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Apply an event; returns the stored formation, or `None` once it is removed
    pub async fn transition(
        &self,
        formation: &Formation,
        event: FormationEvent,
    ) -> StateMachineResult<Option<Formation>> {
        let from_state = formation.state;
        let target_state = Self::determine_target_state(from_state, &event)?;

        let updated = target_state.map(|state| {
            let mut updated = formation.clone();
            updated.state = state;
            updated.awaiting_callback = false;
            updated.error = match &event {
                FormationEvent::LifecycleFailed(error) => Some(error.clone()),
                _ => None,
            };
            updated
        });

        let written = self
            .persistence
            .persist_transition(
                formation,
                updated,
                event.event_type(),
                serde_json::Value::Null,
            )
            .await?;

        let subject = written.as_ref().unwrap_or(formation);
        let actions: Vec<Box<dyn StateAction<Formation>>> = vec![
            Box::new(LogTransitionAction),
            Box::new(PublishTransitionEventAction::new(
                self.event_publisher.clone(),
            )),
        ];
        for action in actions {
            action
                .execute(
                    subject,
                    Some(from_state.to_string()),
                    target_state.map(|s| s.to_string()),
                    event.event_type(),
                )
                .await?;
        }

        Ok(written)
    }

    /// Mark an asynchronous lifecycle request as outstanding
    pub async fn mark_awaiting_callback(
        &self,
        formation: &Formation,
    ) -> StateMachineResult<Formation> {
        let mut updated = formation.clone();
        updated.awaiting_callback = true;
        let written = self
            .persistence
            .persist_transition(
                formation,
                Some(updated),
                "awaiting_callback",
                serde_json::Value::Null,
            )
            .await?;
        written.ok_or_else(|| {
            StateMachineError::Internal(format!("formation {} vanished on update", formation.id))
        })
    }
}
