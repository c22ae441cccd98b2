//! # Formation Engine
//!
//! Entry point for everything outside the engine: management events, receiver callbacks,
//! operator-triggered resynchronization and read queries.
//!
//! Every call that changes a formation takes the formation lock, applies its own change
//! and then settles the formation: the work it scheduled is driven through the
//! [`AssignmentProcessor`] together with all follow-ups, unassigning participants with no
//! assignments left are dropped, and a deleting formation whose last assignment is gone
//! gets its delete notification.
//!
//! ```rust,no_run
//! use formation_engine::config::EngineConfig;
//! use formation_engine::models::{CreateFormationRequest, ParticipantType};
//! use formation_engine::orchestration::{EngineStores, FormationEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = FormationEngine::from_config(&EngineConfig::default(), EngineStores::in_memory())?;
//! let formation = engine
//!     .create_formation(CreateFormationRequest::new("payments", "tenant-1", "default"))
//!     .await?;
//! engine
//!     .assign_participant(formation.id, "app-1", ParticipantType::Application)
//!     .await?;
//! println!("{:?}", engine.formation_status(formation.id).await?.condition);
//! # Ok(())
//! # }
//! ```

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument};
use uuid::Uuid;

use super::assignment_processor::{AssignmentProcessor, DriveSummary, WorkItem};
use super::core::{EngineCore, EngineStores};
use super::lifecycle::{FormationLifecycle, FormationReportOutcome, LifecyclePhase};
use super::resynchronizer::{plan_resync, ResyncReport};
use super::status_aggregator::FormationStatusView;
use super::status_reports::StatusReportOutcome;
use crate::config::{EngineConfig, EngineSettings};
use crate::constants::events;
use crate::constraints::{ConstraintFacts, JoinPointContext};
use crate::dispatch::{HttpWebhookClient, WebhookClient};
use crate::error::{EngineError, EngineResult};
use crate::events::{EventPublisher, PublishedEvent};
use crate::logging::log_formation_operation;
use crate::models::{
    normalize_configuration, AssignmentKey, AssignmentTransition, Constraint,
    CreateFormationRequest, Formation, FormationAssignment, FormationMember,
    FormationStatusReportRequest, FormationTemplate, JoinPoint, ManagementEvent, MemberStatus,
    NewConstraint, NotificationOperation, OperationTrigger, Participant, ParticipantType,
    StatusReportRequest,
};
use crate::state_machine::{AssignmentState, FormationEvent, FormationState};
use crate::store::StoreError;
use crate::templates::{ResourceView, TemplateContext};

/// Result of a management event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum ManagementOutcome {
    /// `None` when a deleted formation is already gone
    Formation(Option<Formation>),
    Assignments(Vec<FormationAssignment>),
}

/// Public facade of the notification engine
#[derive(Debug, Clone)]
pub struct FormationEngine {
    core: Arc<EngineCore>,
    processor: AssignmentProcessor,
    lifecycle: FormationLifecycle,
}

impl FormationEngine {
    pub fn new(
        stores: EngineStores,
        client: Arc<dyn WebhookClient>,
        publisher: EventPublisher,
        settings: EngineSettings,
    ) -> Self {
        let core = Arc::new(EngineCore::new(stores, client, publisher, settings));
        Self {
            processor: AssignmentProcessor::new(core.clone()),
            lifecycle: FormationLifecycle::new(core.clone()),
            core,
        }
    }

    /// Engine with the HTTP webhook client described by the configuration
    pub fn from_config(config: &EngineConfig, stores: EngineStores) -> EngineResult<Self> {
        let client = HttpWebhookClient::new(&config.dispatch)?;
        Ok(Self::new(
            stores,
            Arc::new(client),
            EventPublisher::new(config.events.channel_capacity),
            config.engine.clone(),
        ))
    }

    pub fn core(&self) -> &Arc<EngineCore> {
        &self.core
    }

    /// Lifecycle events of assignments, notifications and formations
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.core.publisher.subscribe()
    }

    // ---------------------------------------------------------------------------------
    // Directory and constraints
    // ---------------------------------------------------------------------------------

    /// Register or replace a participant; its webhook templates must compile
    pub async fn register_participant(
        &self,
        participant: Participant,
    ) -> EngineResult<Participant> {
        for webhook in &participant.webhooks {
            self.core.renderer.validate_webhook(webhook)?;
        }
        let registered = self
            .core
            .stores
            .directory
            .register_participant(participant)
            .await?;
        info!(
            participant_id = %registered.id,
            participant_type = %registered.participant_type,
            "Participant registered"
        );
        Ok(registered)
    }

    pub async fn get_participant(&self, id: &str) -> EngineResult<Participant> {
        self.core
            .stores
            .directory
            .get_participant(id)
            .await?
            .ok_or_else(|| EngineError::not_found("Participant", id))
    }

    pub async fn register_template(
        &self,
        template: FormationTemplate,
    ) -> EngineResult<FormationTemplate> {
        if let Some(webhook) = &template.webhook {
            self.core.renderer.validate_webhook(webhook)?;
        }
        let registered = self.core.stores.directory.register_template(template).await?;
        info!(template_id = %registered.id, "Formation template registered");
        Ok(registered)
    }

    pub async fn attach_constraint(&self, constraint: NewConstraint) -> EngineResult<Constraint> {
        self.core.constraints.attach(constraint).await
    }

    pub async fn detach_constraint(&self, id: Uuid) -> EngineResult<Constraint> {
        self.core.constraints.detach(id).await
    }

    pub async fn list_constraints(&self) -> EngineResult<Vec<Constraint>> {
        self.core.constraints.list().await
    }

    // ---------------------------------------------------------------------------------
    // Management
    // ---------------------------------------------------------------------------------

    /// Apply one management event; redelivery is idempotent
    #[instrument(
        skip(self, event),
        fields(event_type = event.event_type(), tenant = event.tenant())
    )]
    pub async fn handle_event(&self, event: ManagementEvent) -> EngineResult<ManagementOutcome> {
        match event {
            ManagementEvent::FormationCreated {
                formation_id,
                name,
                tenant,
                template_id,
                draft,
            } => {
                let mut request = CreateFormationRequest::new(name, tenant, template_id);
                if draft {
                    request = request.draft();
                }
                if let Some(id) = formation_id {
                    request = request.with_id(id);
                }
                let formation = self.create_formation(request).await?;
                Ok(ManagementOutcome::Formation(Some(formation)))
            }
            ManagementEvent::FormationFinalized { formation_id, .. } => {
                let formation = self.finalize_formation(formation_id).await?;
                Ok(ManagementOutcome::Formation(Some(formation)))
            }
            ManagementEvent::FormationDeleted { formation_id, .. } => Ok(
                ManagementOutcome::Formation(self.delete_formation(formation_id).await?),
            ),
            ManagementEvent::ParticipantAssigned {
                formation_id,
                participant_id,
                participant_type,
                ..
            } => Ok(ManagementOutcome::Assignments(
                self.assign_participant(formation_id, &participant_id, participant_type)
                    .await?,
            )),
            ManagementEvent::ParticipantUnassigned {
                formation_id,
                participant_id,
                participant_type,
                ..
            } => Ok(ManagementOutcome::Assignments(
                self.unassign_participant(formation_id, &participant_id, participant_type)
                    .await?,
            )),
        }
    }

    #[instrument(
        skip(self, request),
        fields(name = %request.name, template_id = %request.template_id)
    )]
    pub async fn create_formation(
        &self,
        request: CreateFormationRequest,
    ) -> EngineResult<Formation> {
        let id = request.id.unwrap_or_else(Uuid::new_v4);
        let _guard = self.core.formation_locks.lock(&id).await;

        if let Some(existing) = self.core.stores.formations.get_formation(id).await? {
            return Ok(existing);
        }
        let template = self
            .core
            .stores
            .directory
            .get_template(&request.template_id)
            .await?
            .ok_or_else(|| EngineError::not_found("FormationTemplate", &request.template_id))?;

        let state = if request.draft {
            FormationState::Draft
        } else {
            FormationState::Initial
        };
        let formation = Formation::new(id, request.name, request.tenant, template.id, state);
        self.enforce(
            JoinPoint::CreateFormation,
            &formation,
            ResourceView::from(&formation),
            TemplateContext::new(NotificationOperation::CreateFormation).with_formation(&formation),
            ConstraintFacts::new().with_formation_id(id),
        )
        .await?;

        let formation = self.core.stores.formations.insert_formation(formation).await?;
        log_formation_operation("create_formation", id, None, "created", Some(state.as_str()));
        if formation.is_draft() {
            return Ok(formation);
        }

        let current = self.lifecycle.notify(formation, LifecyclePhase::Create).await?;
        self.resume_if_ready(id, current).await
    }

    /// Leave DRAFT; assignments collected so far are notified once the lifecycle allows it
    pub async fn finalize_formation(&self, formation_id: Uuid) -> EngineResult<Formation> {
        let _guard = self.core.formation_locks.lock(&formation_id).await;
        let formation = self.require_formation(formation_id).await?;
        if !formation.is_draft() {
            return Ok(formation);
        }

        let facts = ConstraintFacts::new()
            .with_formation_id(formation_id)
            .with_formation_members(self.member_participants(formation_id).await?);
        self.enforce(
            JoinPoint::FinalizeFormation,
            &formation,
            ResourceView::from(&formation),
            TemplateContext::new(NotificationOperation::CreateFormation).with_formation(&formation),
            facts,
        )
        .await?;

        let finalized = self
            .core
            .formation_machine
            .transition(&formation, FormationEvent::Finalize)
            .await?
            .ok_or_else(|| {
                EngineError::Internal(format!("formation {formation_id} vanished on finalize"))
            })?;
        log_formation_operation("finalize_formation", formation_id, None, "finalized", None);

        let current = self.lifecycle.notify(finalized, LifecyclePhase::Create).await?;
        self.resume_if_ready(formation_id, current).await
    }

    /// Unassign every participant, then send the delete notification; `None` once removed.
    /// Drafts are removed directly.
    pub async fn delete_formation(&self, formation_id: Uuid) -> EngineResult<Option<Formation>> {
        let _guard = self.core.formation_locks.lock(&formation_id).await;
        let Some(formation) = self.core.stores.formations.get_formation(formation_id).await? else {
            return Ok(None);
        };

        self.enforce(
            JoinPoint::DeleteFormation,
            &formation,
            ResourceView::from(&formation),
            TemplateContext::new(NotificationOperation::DeleteFormation).with_formation(&formation),
            ConstraintFacts::new().with_formation_id(formation_id),
        )
        .await?;

        if formation.is_draft() {
            return self.discard_draft(formation_id).await;
        }

        let event = match formation.state {
            FormationState::Deleting => None,
            FormationState::DeleteError => Some(FormationEvent::Retry),
            _ => Some(FormationEvent::BeginDelete),
        };
        if let Some(event) = event {
            self.core.formation_machine.transition(&formation, event).await?;
        }
        log_formation_operation("delete_formation", formation_id, None, "deleting", None);

        for member in self.core.stores.formations.list_members(formation_id).await? {
            if member.is_active() {
                self.mark_unassigning(member).await?;
            }
        }
        let items = self
            .core
            .stores
            .assignments
            .list_for_formation(formation_id)
            .await?
            .into_iter()
            .map(|a| WorkItem::unassign(a.key))
            .collect();
        self.settle(formation_id, items).await?;

        Ok(self.core.stores.formations.get_formation(formation_id).await?)
    }

    /// Add a participant; creates its self-assignment and both directions with every other
    /// active member
    #[instrument(skip(self))]
    pub async fn assign_participant(
        &self,
        formation_id: Uuid,
        participant_id: &str,
        participant_type: ParticipantType,
    ) -> EngineResult<Vec<FormationAssignment>> {
        let _guard = self.core.formation_locks.lock(&formation_id).await;
        let formation = self.require_formation(formation_id).await?;

        if matches!(formation.state, FormationState::Deleting | FormationState::DeleteError) {
            return Err(EngineError::invalid_formation_state(
                formation_id,
                "assign",
                format!("formation is {}", formation.state),
            ));
        }
        if !participant_type.is_assignable() {
            return Err(EngineError::InvalidInput(format!(
                "{participant_type} participants cannot be assigned to formations"
            )));
        }
        let participant = self.get_participant(participant_id).await?;
        if participant.participant_type != participant_type {
            return Err(EngineError::InvalidInput(format!(
                "participant {participant_id} is a {}, not a {participant_type}",
                participant.participant_type
            )));
        }

        if let Some(member) = self
            .core
            .stores
            .formations
            .get_member(formation_id, participant_id)
            .await?
        {
            if member.is_active() {
                return self.participant_assignments(formation_id, participant_id).await;
            }
            return Err(EngineError::Conflict(format!(
                "participant {participant_id} is still being unassigned from {formation_id}"
            )));
        }

        let members: Vec<FormationMember> = self
            .core
            .stores
            .formations
            .list_members(formation_id)
            .await?
            .into_iter()
            .filter(FormationMember::is_active)
            .collect();
        let facts = ConstraintFacts::new()
            .with_formation_id(formation_id)
            .with_participant(participant.clone())
            .with_participant_formations(
                self.core
                    .stores
                    .formations
                    .formations_for_participant(participant_id)
                    .await?,
            )
            .with_formation_members(self.member_participants(formation_id).await?);
        self.enforce(
            JoinPoint::AssignFormation,
            &formation,
            ResourceView::from(&participant),
            TemplateContext::new(NotificationOperation::Assign)
                .with_formation(&formation)
                .with_participant(&participant),
            facts,
        )
        .await?;

        self.core
            .stores
            .formations
            .upsert_member(FormationMember::active(formation_id, participant_id, participant_type))
            .await?;

        let mut keys = vec![AssignmentKey::self_assignment(
            formation_id,
            participant_id,
            participant_type,
        )];
        for other in &members {
            keys.push(AssignmentKey::new(
                formation_id,
                participant_id,
                participant_type,
                other.participant_id.clone(),
                other.participant_type,
            ));
            keys.push(AssignmentKey::new(
                formation_id,
                other.participant_id.clone(),
                other.participant_type,
                participant_id,
                participant_type,
            ));
        }
        for key in &keys {
            self.ensure_assignment(key.clone(), &formation.tenant).await?;
        }
        log_formation_operation(
            "assign_participant",
            formation_id,
            Some(participant_id),
            "assigned",
            Some(&format!("{} assignments", keys.len())),
        );

        if !formation.is_draft() {
            let items = keys
                .into_iter()
                .map(|key| WorkItem::drive(key, OperationTrigger::Membership))
                .collect();
            self.settle(formation_id, items).await?;
        }
        self.participant_assignments(formation_id, participant_id).await
    }

    /// Remove a participant; its assignments are unassigned in order and the membership
    /// goes away with the last of them
    #[instrument(skip(self))]
    pub async fn unassign_participant(
        &self,
        formation_id: Uuid,
        participant_id: &str,
        participant_type: ParticipantType,
    ) -> EngineResult<Vec<FormationAssignment>> {
        let _guard = self.core.formation_locks.lock(&formation_id).await;
        let formation = self.require_formation(formation_id).await?;

        let Some(member) = self
            .core
            .stores
            .formations
            .get_member(formation_id, participant_id)
            .await?
        else {
            return Ok(Vec::new());
        };
        if member.participant_type != participant_type {
            return Err(EngineError::InvalidInput(format!(
                "participant {participant_id} is a {}, not a {participant_type}",
                member.participant_type
            )));
        }

        let participant = self
            .core
            .stores
            .directory
            .get_participant(participant_id)
            .await?;
        let resource = match &participant {
            Some(participant) => ResourceView::from(participant),
            None => ResourceView {
                resource_type: participant_type,
                subtype: None,
                id: participant_id.to_string(),
            },
        };
        let mut render =
            TemplateContext::new(NotificationOperation::Unassign).with_formation(&formation);
        let mut facts = ConstraintFacts::new()
            .with_formation_id(formation_id)
            .with_formation_members(self.member_participants(formation_id).await?);
        if let Some(participant) = participant {
            render = render.with_participant(&participant);
            facts = facts.with_participant(participant);
        }
        self.enforce(JoinPoint::UnassignFormation, &formation, resource, render, facts)
            .await?;

        if member.is_active() {
            self.mark_unassigning(member).await?;
        }
        log_formation_operation(
            "unassign_participant",
            formation_id,
            Some(participant_id),
            "unassigning",
            None,
        );

        let items = self
            .participant_assignments(formation_id, participant_id)
            .await?
            .into_iter()
            .map(|a| WorkItem::unassign(a.key))
            .collect();
        self.settle(formation_id, items).await?;

        self.participant_assignments(formation_id, participant_id).await
    }

    /// Re-drive every assignment that is not READY and retry a failed lifecycle step
    #[instrument(skip(self))]
    pub async fn resynchronize(&self, formation_id: Uuid) -> EngineResult<ResyncReport> {
        let _guard = self.core.formation_locks.lock(&formation_id).await;
        let formation = self.require_formation(formation_id).await?;
        if formation.is_draft() {
            return Err(EngineError::invalid_formation_state(
                formation_id,
                "resynchronize",
                "draft formations are not notified",
            ));
        }

        match formation.state {
            FormationState::CreateError => {
                if let Some(retried) = self
                    .core
                    .formation_machine
                    .transition(&formation, FormationEvent::Retry)
                    .await?
                {
                    self.lifecycle.notify(retried, LifecyclePhase::Create).await?;
                }
            }
            FormationState::DeleteError => {
                self.core
                    .formation_machine
                    .transition(&formation, FormationEvent::Retry)
                    .await?;
            }
            FormationState::Initial if !formation.awaiting_callback => {
                self.lifecycle.notify(formation, LifecyclePhase::Create).await?;
            }
            _ => {}
        }

        let assignments = self
            .core
            .stores
            .assignments
            .list_for_formation(formation_id)
            .await?;
        let (items, untouched) = plan_resync(&assignments);
        let redriven = items.len();
        let summary = self.settle(formation_id, items).await?;

        let formation_state = self
            .core
            .stores
            .formations
            .get_formation(formation_id)
            .await?
            .map(|f| f.state);
        log_formation_operation(
            "resynchronize",
            formation_id,
            None,
            "completed",
            Some(&format!("{redriven} redriven, {untouched} untouched")),
        );

        Ok(ResyncReport {
            formation_id,
            redriven,
            untouched,
            formation_state,
            summary,
        })
    }

    // ---------------------------------------------------------------------------------
    // Receiver callbacks
    // ---------------------------------------------------------------------------------

    /// Apply an asynchronous status report for an assignment
    #[instrument(skip(self, request), fields(state = %request.state))]
    pub async fn report_assignment_status(
        &self,
        formation_id: Uuid,
        assignment_id: Uuid,
        request: StatusReportRequest,
    ) -> EngineResult<StatusReportOutcome> {
        let _guard = self.core.formation_locks.lock(&formation_id).await;

        let assignment = match self.core.stores.assignments.get(assignment_id).await? {
            Some(assignment) if assignment.formation_id() == formation_id => assignment,
            _ => {
                let reason =
                    format!("assignment {assignment_id} not found in formation {formation_id}");
                self.core
                    .publish(
                        events::STATUS_REPORT_IGNORED,
                        serde_json::json!({
                            "assignment_id": assignment_id,
                            "formation_id": formation_id,
                            "reason": reason,
                        }),
                    )
                    .await;
                return Ok(StatusReportOutcome::ignored(reason));
            }
        };

        let report = request
            .into_report(assignment.operation_kind())
            .map_err(EngineError::InvalidStatusReport)?;
        let (outcome, follow_ups) = self.processor.apply_callback(&assignment.key, report).await?;
        self.settle(formation_id, follow_ups).await?;
        Ok(outcome)
    }

    /// Replace the configuration of an established pair and re-notify its reverse
    #[instrument(skip(self, request), fields(state = %request.state))]
    pub async fn reset_assignment(
        &self,
        formation_id: Uuid,
        assignment_id: Uuid,
        request: StatusReportRequest,
    ) -> EngineResult<FormationAssignment> {
        let _guard = self.core.formation_locks.lock(&formation_id).await;
        let assignment = self.require_assignment(formation_id, assignment_id).await?;

        let state = request
            .state
            .parse::<AssignmentState>()
            .map_err(EngineError::InvalidStatusReport)?;
        if !matches!(state, AssignmentState::Ready | AssignmentState::ConfigPending) {
            return Err(EngineError::InvalidStatusReport(format!(
                "a reset can only move to READY or CONFIG_PENDING, got {state}"
            )));
        }
        let configuration = normalize_configuration(request.configuration).ok_or_else(|| {
            EngineError::InvalidStatusReport(
                "a reset requires a non-empty configuration".to_string(),
            )
        })?;

        let (updated, follow_ups) = self
            .processor
            .reset(&assignment.key, state, configuration)
            .await?;
        self.settle(formation_id, follow_ups).await?;

        Ok(self
            .core
            .stores
            .assignments
            .get(assignment_id)
            .await?
            .unwrap_or(updated))
    }

    /// Apply an asynchronous lifecycle report for a formation
    #[instrument(skip(self, request), fields(state = %request.state))]
    pub async fn report_formation_status(
        &self,
        formation_id: Uuid,
        request: FormationStatusReportRequest,
    ) -> EngineResult<FormationReportOutcome> {
        let _guard = self.core.formation_locks.lock(&formation_id).await;
        let outcome = self.lifecycle.report_status(formation_id, request).await?;

        match &outcome {
            FormationReportOutcome::Applied(formation)
                if formation.state == FormationState::Ready =>
            {
                let items = self
                    .processor
                    .pending_work(formation_id, OperationTrigger::FollowUp)
                    .await?;
                self.settle(formation_id, items).await?;
            }
            FormationReportOutcome::Applied(formation)
                if formation.state == FormationState::Deleting =>
            {
                self.settle(formation_id, Vec::new()).await?;
            }
            _ => {}
        }
        Ok(outcome)
    }

    // ---------------------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------------------

    pub async fn get_formation(&self, formation_id: Uuid) -> EngineResult<Formation> {
        self.require_formation(formation_id).await
    }

    pub async fn formation_status(&self, formation_id: Uuid) -> EngineResult<FormationStatusView> {
        let formation = self.require_formation(formation_id).await?;
        let assignments = self
            .core
            .stores
            .assignments
            .list_for_formation(formation_id)
            .await?;
        Ok(FormationStatusView::build(&formation, &assignments))
    }

    pub async fn list_assignments(
        &self,
        formation_id: Uuid,
    ) -> EngineResult<Vec<FormationAssignment>> {
        self.require_formation(formation_id).await?;
        Ok(self
            .core
            .stores
            .assignments
            .list_for_formation(formation_id)
            .await?)
    }

    pub async fn get_assignment(
        &self,
        formation_id: Uuid,
        assignment_id: Uuid,
    ) -> EngineResult<FormationAssignment> {
        self.require_assignment(formation_id, assignment_id).await
    }

    /// Audit trail of an assignment, oldest first
    pub async fn assignment_history(
        &self,
        formation_id: Uuid,
        assignment_id: Uuid,
    ) -> EngineResult<Vec<AssignmentTransition>> {
        let transitions = self
            .core
            .stores
            .assignments
            .list_transitions(assignment_id)
            .await?;
        if transitions.is_empty() {
            self.require_assignment(formation_id, assignment_id).await?;
        }
        Ok(transitions
            .into_iter()
            .filter(|t| t.formation_id == formation_id)
            .collect())
    }

    // ---------------------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------------------

    async fn settle(&self, formation_id: Uuid, items: Vec<WorkItem>) -> EngineResult<DriveSummary> {
        let summary = self.processor.drive(items).await;
        self.processor.cleanup_memberships(formation_id).await?;
        self.lifecycle.finish_delete_if_drained(formation_id).await?;
        self.core.prune_locks();
        Ok(summary)
    }

    /// Notify the collected assignments once the create lifecycle reached READY
    async fn resume_if_ready(
        &self,
        formation_id: Uuid,
        current: Option<Formation>,
    ) -> EngineResult<Formation> {
        let current = current.ok_or_else(|| {
            EngineError::Internal(format!("formation {formation_id} vanished during its lifecycle"))
        })?;
        if current.state != FormationState::Ready {
            return Ok(current);
        }

        let items = self
            .processor
            .pending_work(formation_id, OperationTrigger::Finalize)
            .await?;
        self.settle(formation_id, items).await?;
        self.require_formation(formation_id).await
    }

    async fn enforce(
        &self,
        join_point: JoinPoint,
        formation: &Formation,
        resource: ResourceView,
        render: TemplateContext,
        facts: ConstraintFacts,
    ) -> EngineResult<()> {
        let ctx = JoinPointContext::new(join_point, formation.template_id.clone(), resource, render)
            .with_facts(facts);
        self.core.constraints.enforce(&ctx).await
    }

    async fn ensure_assignment(
        &self,
        key: AssignmentKey,
        tenant: &str,
    ) -> EngineResult<FormationAssignment> {
        let assignments = &self.core.stores.assignments;
        match assignments.insert(FormationAssignment::new(key.clone(), tenant)).await {
            Ok(created) => Ok(created),
            Err(StoreError::AlreadyExists { .. }) => assignments
                .find_by_key(&key)
                .await?
                .ok_or_else(|| {
                    EngineError::Internal(format!("assignment {key} vanished on insert"))
                }),
            Err(error) => Err(error.into()),
        }
    }

    /// Remove a draft with its never-notified assignments; no webhook is called
    async fn discard_draft(&self, formation_id: Uuid) -> EngineResult<Option<Formation>> {
        for member in self.core.stores.formations.list_members(formation_id).await? {
            if member.is_active() {
                self.mark_unassigning(member).await?;
            }
        }
        let items = self
            .core
            .stores
            .assignments
            .list_for_formation(formation_id)
            .await?
            .into_iter()
            .map(|a| WorkItem::unassign(a.key))
            .collect();
        self.processor.drive(items).await;
        self.processor.cleanup_memberships(formation_id).await?;

        let remaining = self
            .core
            .stores
            .assignments
            .list_for_formation(formation_id)
            .await?;
        if !remaining.is_empty() {
            return Err(EngineError::Internal(format!(
                "draft formation {formation_id} kept {} assignments on delete",
                remaining.len()
            )));
        }

        let formation = self.require_formation(formation_id).await?;
        self.core
            .formation_machine
            .transition(&formation, FormationEvent::BeginDelete)
            .await?;
        log_formation_operation(
            "delete_formation",
            formation_id,
            None,
            "deleted",
            Some("draft"),
        );
        self.core.prune_locks();
        Ok(None)
    }

    async fn mark_unassigning(&self, mut member: FormationMember) -> EngineResult<()> {
        member.status = MemberStatus::Unassigning;
        self.core.stores.formations.upsert_member(member).await?;
        Ok(())
    }

    async fn member_participants(&self, formation_id: Uuid) -> EngineResult<Vec<Participant>> {
        let mut participants = Vec::new();
        for member in self.core.stores.formations.list_members(formation_id).await? {
            if !member.is_active() {
                continue;
            }
            if let Some(participant) = self
                .core
                .stores
                .directory
                .get_participant(&member.participant_id)
                .await?
            {
                participants.push(participant);
            }
        }
        Ok(participants)
    }

    async fn participant_assignments(
        &self,
        formation_id: Uuid,
        participant_id: &str,
    ) -> EngineResult<Vec<FormationAssignment>> {
        Ok(self
            .core
            .stores
            .assignments
            .list_for_participant(formation_id, participant_id)
            .await?)
    }

    async fn require_formation(&self, formation_id: Uuid) -> EngineResult<Formation> {
        self.core
            .stores
            .formations
            .get_formation(formation_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Formation", formation_id))
    }

    async fn require_assignment(
        &self,
        formation_id: Uuid,
        assignment_id: Uuid,
    ) -> EngineResult<FormationAssignment> {
        match self.core.stores.assignments.get(assignment_id).await? {
            Some(assignment) if assignment.formation_id() == formation_id => Ok(assignment),
            _ => Err(EngineError::not_found("FormationAssignment", assignment_id)),
        }
    }
}
