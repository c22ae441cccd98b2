//! # Store Layer
//!
//! Persistence seams for the engine. Every component receives the stores it needs as
//! `Arc<dyn ...>` trait objects; there is no global state beyond what a store holds.
//!
//! ## Stores
//!
//! - [`AssignmentStore`] - one record per ordered participant pair per formation, with
//!   versioned compare-and-set writes and an append-only transition audit
//! - [`FormationStore`] - formations and their memberships
//! - [`ParticipantDirectory`] - participant descriptors and formation templates fed by the
//!   management layer
//! - [`ConstraintStore`] - attached constraints, ordered for evaluation
//!
//! [`memory::InMemoryStore`] implements all four.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AssignmentKey, AssignmentTransition, Constraint, Formation, FormationAssignment,
    FormationMember, FormationTemplate, JoinPoint, NewConstraint, Participant,
};

pub use memory::InMemoryStore;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Entity not found: {entity_id}")]
    NotFound { entity_id: String },

    #[error("Entity already exists: {entity_id}")]
    AlreadyExists { entity_id: String },

    #[error("Concurrent modification detected for entity {entity_id} (expected version {expected_version})")]
    ConcurrentModification {
        entity_id: String,
        expected_version: u64,
    },

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity_id: impl ToString) -> Self {
        Self::NotFound {
            entity_id: entity_id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Insert a new record; fails when a record with the same key exists
    async fn insert(&self, assignment: FormationAssignment) -> StoreResult<FormationAssignment>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<FormationAssignment>>;

    async fn find_by_key(&self, key: &AssignmentKey) -> StoreResult<Option<FormationAssignment>>;

    /// All records of a formation, ordered by key
    async fn list_for_formation(&self, formation_id: Uuid)
        -> StoreResult<Vec<FormationAssignment>>;

    /// Records of a formation where the participant is source or target
    async fn list_for_participant(
        &self,
        formation_id: Uuid,
        participant_id: &str,
    ) -> StoreResult<Vec<FormationAssignment>>;

    /// Replace the record if its stored version still equals `expected_version`
    async fn compare_and_set(
        &self,
        expected_version: u64,
        updated: FormationAssignment,
    ) -> StoreResult<FormationAssignment>;

    /// Delete the record if its stored version still equals `expected_version`
    async fn compare_and_delete(
        &self,
        id: Uuid,
        expected_version: u64,
    ) -> StoreResult<FormationAssignment>;

    async fn record_transition(&self, transition: AssignmentTransition) -> StoreResult<()>;

    async fn list_transitions(&self, assignment_id: Uuid) -> StoreResult<Vec<AssignmentTransition>>;
}

#[async_trait]
pub trait FormationStore: Send + Sync {
    async fn insert_formation(&self, formation: Formation) -> StoreResult<Formation>;

    async fn get_formation(&self, id: Uuid) -> StoreResult<Option<Formation>>;

    async fn compare_and_set_formation(
        &self,
        expected_version: u64,
        updated: Formation,
    ) -> StoreResult<Formation>;

    /// Remove the formation and its memberships
    async fn delete_formation(&self, id: Uuid) -> StoreResult<()>;

    async fn upsert_member(&self, member: FormationMember) -> StoreResult<FormationMember>;

    async fn get_member(
        &self,
        formation_id: Uuid,
        participant_id: &str,
    ) -> StoreResult<Option<FormationMember>>;

    async fn remove_member(&self, formation_id: Uuid, participant_id: &str) -> StoreResult<bool>;

    /// Members ordered by assignment time
    async fn list_members(&self, formation_id: Uuid) -> StoreResult<Vec<FormationMember>>;

    /// Formations the participant is currently a member of
    async fn formations_for_participant(&self, participant_id: &str)
        -> StoreResult<Vec<Formation>>;
}

#[async_trait]
pub trait ParticipantDirectory: Send + Sync {
    async fn get_participant(&self, id: &str) -> StoreResult<Option<Participant>>;

    async fn register_participant(&self, participant: Participant) -> StoreResult<Participant>;

    async fn get_template(&self, id: &str) -> StoreResult<Option<FormationTemplate>>;

    async fn register_template(&self, template: FormationTemplate)
        -> StoreResult<FormationTemplate>;
}

#[async_trait]
pub trait ConstraintStore: Send + Sync {
    async fn attach(&self, constraint: NewConstraint) -> StoreResult<Constraint>;

    async fn detach(&self, id: Uuid) -> StoreResult<Constraint>;

    /// Constraints at a join point ordered by priority (descending) then attachment sequence
    async fn list_for_join_point(&self, join_point: JoinPoint) -> StoreResult<Vec<Constraint>>;

    async fn list_constraints(&self) -> StoreResult<Vec<Constraint>>;
}
