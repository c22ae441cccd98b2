//! # Engine Core
//!
//! Shared components every orchestration service works with. One [`EngineCore`] is built
//! per engine and handed out as `Arc<EngineCore>`; it owns no state of its own beyond the
//! lock tables and the operation sequence.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::locks::LockTable;
use crate::config::EngineSettings;
use crate::constraints::ConstraintEngine;
use crate::dispatch::{NotificationDispatcher, WebhookClient};
use crate::events::EventPublisher;
use crate::models::AssignmentKey;
use crate::state_machine::{AssignmentStateMachine, FormationStateMachine};
use crate::store::{
    AssignmentStore, ConstraintStore, FormationStore, InMemoryStore, ParticipantDirectory,
};
use crate::templates::TemplateRenderer;

/// The four persistence seams the engine depends on
#[derive(Clone)]
pub struct EngineStores {
    pub assignments: Arc<dyn AssignmentStore>,
    pub formations: Arc<dyn FormationStore>,
    pub directory: Arc<dyn ParticipantDirectory>,
    pub constraints: Arc<dyn ConstraintStore>,
}

impl EngineStores {
    /// Use one backend for every seam
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: AssignmentStore + FormationStore + ParticipantDirectory + ConstraintStore + 'static,
    {
        Self {
            assignments: store.clone(),
            formations: store.clone(),
            directory: store.clone(),
            constraints: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::shared(Arc::new(InMemoryStore::new()))
    }
}

impl std::fmt::Debug for EngineStores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineStores").finish_non_exhaustive()
    }
}

/// Components shared by the assignment processor, the lifecycle service and the facade
pub struct EngineCore {
    pub stores: EngineStores,
    pub renderer: Arc<TemplateRenderer>,
    pub constraints: ConstraintEngine,
    pub dispatcher: NotificationDispatcher,
    pub assignment_machine: AssignmentStateMachine,
    pub formation_machine: FormationStateMachine,
    pub publisher: EventPublisher,
    /// One writer per assignment key at a time
    pub assignment_locks: LockTable<AssignmentKey>,
    /// Management operations and follow-up batches of one formation run one at a time
    pub formation_locks: LockTable<Uuid>,
    pub settings: EngineSettings,
    operation_sequence: AtomicU64,
}

impl std::fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCore")
            .field("settings", &self.settings)
            .field("operation_sequence", &self.operation_sequence)
            .finish_non_exhaustive()
    }
}

impl EngineCore {
    pub fn new(
        stores: EngineStores,
        client: Arc<dyn WebhookClient>,
        publisher: EventPublisher,
        settings: EngineSettings,
    ) -> Self {
        info!(
            max_concurrent_notifications = settings.max_concurrent_notifications,
            max_follow_up_rounds = settings.max_follow_up_rounds,
            "🔧 Initializing engine core"
        );

        let renderer = Arc::new(TemplateRenderer::new());
        Self {
            constraints: ConstraintEngine::new(stores.constraints.clone(), renderer.clone()),
            dispatcher: NotificationDispatcher::new(client),
            assignment_machine: AssignmentStateMachine::new(
                stores.assignments.clone(),
                publisher.clone(),
            ),
            formation_machine: FormationStateMachine::new(
                stores.formations.clone(),
                publisher.clone(),
            ),
            renderer,
            stores,
            publisher,
            assignment_locks: LockTable::new(),
            formation_locks: LockTable::new(),
            settings,
            operation_sequence: AtomicU64::new(0),
        }
    }

    /// Next operation id; strictly increasing for the lifetime of the engine
    pub fn next_operation_id(&self) -> u64 {
        self.operation_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publish an engine event; losing an event never fails the operation
    pub async fn publish(&self, name: &str, context: Value) {
        if let Err(error) = self.publisher.publish(name, context).await {
            warn!(event = %name, error = %error, "Failed to publish engine event");
        }
    }

    /// Forget locks that are no longer held
    pub fn prune_locks(&self) {
        self.assignment_locks.prune();
        self.formation_locks.prune();
    }
}
