use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use super::errors::PersistenceResult;
use crate::models::{AssignmentTransition, Formation, FormationAssignment};
use crate::store::{AssignmentStore, FormationStore};

/// Trait for persisting state transitions
#[async_trait]
pub trait TransitionPersistence<T>: Send + Sync {
    /// Store `updated` (or delete the entity when `None`) if `current` is still the stored
    /// version. Returns what was written.
    async fn persist_transition(
        &self,
        current: &T,
        updated: Option<T>,
        event: &str,
        metadata: Value,
    ) -> PersistenceResult<Option<T>>;
}

/// Compare-and-set writes of assignment records plus the transition audit
#[derive(Clone)]
pub struct AssignmentTransitionPersistence {
    store: Arc<dyn AssignmentStore>,
}

impl AssignmentTransitionPersistence {
    pub fn new(store: Arc<dyn AssignmentStore>) -> Self {
        Self { store }
    }

    /// Write fields that are not part of the state, such as operation bookkeeping
    pub async fn persist_fields(
        &self,
        current: &FormationAssignment,
        updated: FormationAssignment,
    ) -> PersistenceResult<FormationAssignment> {
        Ok(self.store.compare_and_set(current.version, updated).await?)
    }
}

#[async_trait]
impl TransitionPersistence<FormationAssignment> for AssignmentTransitionPersistence {
    async fn persist_transition(
        &self,
        current: &FormationAssignment,
        updated: Option<FormationAssignment>,
        event: &str,
        metadata: Value,
    ) -> PersistenceResult<Option<FormationAssignment>> {
        let written = match updated {
            Some(updated) => Some(self.store.compare_and_set(current.version, updated).await?),
            None => {
                self.store
                    .compare_and_delete(current.id, current.version)
                    .await?;
                None
            }
        };

        let transition = AssignmentTransition {
            id: Uuid::new_v4(),
            assignment_id: current.id,
            formation_id: current.formation_id(),
            from_state: Some(current.state),
            to_state: written.as_ref().map(|a| a.state),
            event: event.to_string(),
            operation_id: written
                .as_ref()
                .and_then(FormationAssignment::operation_id)
                .or_else(|| current.operation_id()),
            metadata,
            created_at: Utc::now(),
        };
        self.store.record_transition(transition).await?;

        Ok(written)
    }
}

/// Compare-and-set writes of formation records
#[derive(Clone)]
pub struct FormationTransitionPersistence {
    store: Arc<dyn FormationStore>,
}

impl FormationTransitionPersistence {
    pub fn new(store: Arc<dyn FormationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TransitionPersistence<Formation> for FormationTransitionPersistence {
    async fn persist_transition(
        &self,
        current: &Formation,
        updated: Option<Formation>,
        event: &str,
        _metadata: Value,
    ) -> PersistenceResult<Option<Formation>> {
        let written = match updated {
            Some(updated) => Some(
                self.store
                    .compare_and_set_formation(current.version, updated)
                    .await?,
            ),
            None => {
                self.store.delete_formation(current.id).await?;
                None
            }
        };
        tracing::debug!(
            formation_id = %current.id,
            event = %event,
            "Formation transition persisted"
        );
        Ok(written)
    }
}
