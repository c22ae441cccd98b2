//! In-memory implementation of every store trait, backed by `DashMap` shards.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::{
    AssignmentStore, ConstraintStore, FormationStore, ParticipantDirectory, StoreError,
    StoreResult,
};
use crate::models::{
    AssignmentKey, AssignmentTransition, Constraint, Formation, FormationAssignment,
    FormationMember, FormationTemplate, JoinPoint, NewConstraint, Participant,
};

#[derive(Debug, Default)]
pub struct InMemoryStore {
    assignments: DashMap<Uuid, FormationAssignment>,
    assignment_keys: DashMap<AssignmentKey, Uuid>,
    transitions: RwLock<Vec<AssignmentTransition>>,
    formations: DashMap<Uuid, Formation>,
    members: DashMap<(Uuid, String), FormationMember>,
    participants: DashMap<String, Participant>,
    templates: DashMap<String, FormationTemplate>,
    constraints: RwLock<Vec<Constraint>>,
    constraint_sequence: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryStore {
    async fn insert(&self, assignment: FormationAssignment) -> StoreResult<FormationAssignment> {
        match self.assignment_keys.entry(assignment.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                entity_id: assignment.key.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(assignment.id);
                self.assignments.insert(assignment.id, assignment.clone());
                Ok(assignment)
            }
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<FormationAssignment>> {
        Ok(self.assignments.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_key(&self, key: &AssignmentKey) -> StoreResult<Option<FormationAssignment>> {
        let id = match self.assignment_keys.get(key) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get(id).await
    }

    async fn list_for_formation(
        &self,
        formation_id: Uuid,
    ) -> StoreResult<Vec<FormationAssignment>> {
        let mut assignments: Vec<FormationAssignment> = self
            .assignments
            .iter()
            .filter(|entry| entry.key.formation_id == formation_id)
            .map(|entry| entry.value().clone())
            .collect();
        assignments.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(assignments)
    }

    async fn list_for_participant(
        &self,
        formation_id: Uuid,
        participant_id: &str,
    ) -> StoreResult<Vec<FormationAssignment>> {
        let mut assignments = self.list_for_formation(formation_id).await?;
        assignments.retain(|a| a.key.involves(participant_id));
        Ok(assignments)
    }

    async fn compare_and_set(
        &self,
        expected_version: u64,
        mut updated: FormationAssignment,
    ) -> StoreResult<FormationAssignment> {
        let mut entry = self
            .assignments
            .get_mut(&updated.id)
            .ok_or_else(|| StoreError::not_found(updated.id))?;

        if entry.version != expected_version {
            return Err(StoreError::ConcurrentModification {
                entity_id: updated.id.to_string(),
                expected_version,
            });
        }
        if entry.key != updated.key {
            return Err(StoreError::Backend(format!(
                "assignment {} cannot change its key",
                updated.id
            )));
        }

        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        *entry = updated.clone();
        Ok(updated)
    }

    async fn compare_and_delete(
        &self,
        id: Uuid,
        expected_version: u64,
    ) -> StoreResult<FormationAssignment> {
        let removed = self
            .assignments
            .remove_if(&id, |_, current| current.version == expected_version);

        match removed {
            Some((_, assignment)) => {
                self.assignment_keys.remove(&assignment.key);
                Ok(assignment)
            }
            None if self.assignments.contains_key(&id) => {
                Err(StoreError::ConcurrentModification {
                    entity_id: id.to_string(),
                    expected_version,
                })
            }
            None => Err(StoreError::not_found(id)),
        }
    }

    async fn record_transition(&self, transition: AssignmentTransition) -> StoreResult<()> {
        self.transitions.write().push(transition);
        Ok(())
    }

    async fn list_transitions(
        &self,
        assignment_id: Uuid,
    ) -> StoreResult<Vec<AssignmentTransition>> {
        Ok(self
            .transitions
            .read()
            .iter()
            .filter(|t| t.assignment_id == assignment_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl FormationStore for InMemoryStore {
    async fn insert_formation(&self, formation: Formation) -> StoreResult<Formation> {
        match self.formations.entry(formation.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                entity_id: formation.id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(formation.clone());
                Ok(formation)
            }
        }
    }

    async fn get_formation(&self, id: Uuid) -> StoreResult<Option<Formation>> {
        Ok(self.formations.get(&id).map(|entry| entry.value().clone()))
    }

    async fn compare_and_set_formation(
        &self,
        expected_version: u64,
        mut updated: Formation,
    ) -> StoreResult<Formation> {
        let mut entry = self
            .formations
            .get_mut(&updated.id)
            .ok_or_else(|| StoreError::not_found(updated.id))?;

        if entry.version != expected_version {
            return Err(StoreError::ConcurrentModification {
                entity_id: updated.id.to_string(),
                expected_version,
            });
        }

        updated.version = expected_version + 1;
        updated.updated_at = Utc::now();
        *entry = updated.clone();
        Ok(updated)
    }

    async fn delete_formation(&self, id: Uuid) -> StoreResult<()> {
        self.formations
            .remove(&id)
            .ok_or_else(|| StoreError::not_found(id))?;
        self.members.retain(|(formation_id, _), _| *formation_id != id);
        Ok(())
    }

    async fn upsert_member(&self, member: FormationMember) -> StoreResult<FormationMember> {
        self.members.insert(
            (member.formation_id, member.participant_id.clone()),
            member.clone(),
        );
        Ok(member)
    }

    async fn get_member(
        &self,
        formation_id: Uuid,
        participant_id: &str,
    ) -> StoreResult<Option<FormationMember>> {
        Ok(self
            .members
            .get(&(formation_id, participant_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn remove_member(&self, formation_id: Uuid, participant_id: &str) -> StoreResult<bool> {
        Ok(self
            .members
            .remove(&(formation_id, participant_id.to_string()))
            .is_some())
    }

    async fn list_members(&self, formation_id: Uuid) -> StoreResult<Vec<FormationMember>> {
        let mut members: Vec<FormationMember> = self
            .members
            .iter()
            .filter(|entry| entry.key().0 == formation_id)
            .map(|entry| entry.value().clone())
            .collect();
        members.sort_by(|a, b| {
            a.assigned_at
                .cmp(&b.assigned_at)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        Ok(members)
    }

    async fn formations_for_participant(
        &self,
        participant_id: &str,
    ) -> StoreResult<Vec<Formation>> {
        let formation_ids: Vec<Uuid> = self
            .members
            .iter()
            .filter(|entry| entry.key().1 == participant_id)
            .map(|entry| entry.key().0)
            .collect();

        Ok(formation_ids
            .into_iter()
            .filter_map(|id| self.formations.get(&id).map(|f| f.value().clone()))
            .collect())
    }
}

#[async_trait]
impl ParticipantDirectory for InMemoryStore {
    async fn get_participant(&self, id: &str) -> StoreResult<Option<Participant>> {
        Ok(self.participants.get(id).map(|entry| entry.value().clone()))
    }

    async fn register_participant(&self, participant: Participant) -> StoreResult<Participant> {
        self.participants
            .insert(participant.id.clone(), participant.clone());
        Ok(participant)
    }

    async fn get_template(&self, id: &str) -> StoreResult<Option<FormationTemplate>> {
        Ok(self.templates.get(id).map(|entry| entry.value().clone()))
    }

    async fn register_template(
        &self,
        template: FormationTemplate,
    ) -> StoreResult<FormationTemplate> {
        self.templates.insert(template.id.clone(), template.clone());
        Ok(template)
    }
}

#[async_trait]
impl ConstraintStore for InMemoryStore {
    async fn attach(&self, constraint: NewConstraint) -> StoreResult<Constraint> {
        let sequence = self.constraint_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let constraint = constraint.into_constraint(sequence);
        self.constraints.write().push(constraint.clone());
        Ok(constraint)
    }

    async fn detach(&self, id: Uuid) -> StoreResult<Constraint> {
        let mut constraints = self.constraints.write();
        let position = constraints
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| StoreError::not_found(id))?;
        Ok(constraints.remove(position))
    }

    async fn list_for_join_point(&self, join_point: JoinPoint) -> StoreResult<Vec<Constraint>> {
        let mut matching: Vec<Constraint> = self
            .constraints
            .read()
            .iter()
            .filter(|c| c.join_point == join_point)
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        Ok(matching)
    }

    async fn list_constraints(&self) -> StoreResult<Vec<Constraint>> {
        Ok(self.constraints.read().clone())
    }
}
