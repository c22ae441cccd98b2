//! # Assignment Processor
//!
//! Drives formation assignments through the notification pipeline, one assignment key at a
//! time.
//!
//! ## Pipeline
//!
//! For every work item the processor takes the per-key lock, reloads the record and then:
//!
//! 1. **Prepare**: start removal, retry an error or re-open an established assignment,
//!    depending on why the item was scheduled
//! 2. **Gate**: dispatch guards decide whether the assignment may be notified yet
//! 3. **Generate**: generation constraints may suppress the notification
//! 4. **Correlate**: the operation id is written before anything leaves the engine
//! 5. **Render and send**: send constraints may redirect, fan out or defer delivery
//! 6. **Apply**: the classified result goes through status constraints and the state
//!    machine, exactly like a callback report
//!
//! Each processed item returns follow-up items: cross pairs released by a READY
//! self-assignment, deferred reverses, counterparts to re-notify with a new configuration
//! and removals unblocked by an earlier removal. [`AssignmentProcessor::drive`] runs them
//! in bounded rounds.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::core::EngineCore;
use super::status_reports::{ignore_reason, report_event, StatusReportOutcome};
use crate::constants::events;
use crate::constants::messages::REPORTED_ERROR_WITHOUT_MESSAGE;
use crate::constraints::{
    ConstraintFacts, GenerationDecision, JoinPointContext, SendDecision, StatusDecision,
};
use crate::dispatch::{failure_state, DispatchOutcome};
use crate::error::{EngineError, EngineResult};
use crate::logging::{log_error, log_formation_operation};
use crate::models::{
    AssignmentError, AssignmentKey, AssignmentOperation, Destination, ErrorCode, Formation,
    FormationAssignment, JoinPoint, MemberStatus, Notification, NotificationOperation,
    OperationKind, OperationTrigger, StatusReport, Webhook, WebhookMode,
};
use crate::state_machine::{
    dispatch_guards, AssignmentEvent, AssignmentState, GuardContext, StateMachineError,
    TransitionOutcome,
};
use crate::templates::{NotificationTarget, ResourceView, TemplateContext};

/// Why an assignment was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    /// Notify if the assignment is in progress and nothing is outstanding
    Drive,
    /// The reverse configuration changed; `force` skips the comparison with what was sent
    Renotify { force: bool },
    /// Move onto the removal path, then notify
    Unassign,
    /// Retry errors and re-issue outstanding requests
    Resync,
}

impl WorkKind {
    /// Stronger kinds win when the same key is scheduled twice in one round
    fn rank(&self) -> u8 {
        match self {
            Self::Drive => 0,
            Self::Renotify { force: false } => 1,
            Self::Renotify { force: true } => 2,
            Self::Resync => 3,
            Self::Unassign => 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub key: AssignmentKey,
    pub kind: WorkKind,
    pub trigger: OperationTrigger,
}

impl WorkItem {
    pub fn drive(key: AssignmentKey, trigger: OperationTrigger) -> Self {
        Self {
            key,
            kind: WorkKind::Drive,
            trigger,
        }
    }

    pub fn renotify(key: AssignmentKey, force: bool, trigger: OperationTrigger) -> Self {
        Self {
            key,
            kind: WorkKind::Renotify { force },
            trigger,
        }
    }

    pub fn unassign(key: AssignmentKey) -> Self {
        Self {
            key,
            kind: WorkKind::Unassign,
            trigger: OperationTrigger::Membership,
        }
    }

    pub fn resync(key: AssignmentKey) -> Self {
        Self {
            key,
            kind: WorkKind::Resync,
            trigger: OperationTrigger::Resync,
        }
    }
}

/// Result of processing one work item
#[derive(Debug, Default)]
pub struct ProcessResult {
    pub follow_ups: Vec<WorkItem>,
    /// A request was sent to a receiver
    pub notified: bool,
    /// Last transition applied, if any
    pub outcome: Option<TransitionOutcome>,
}

impl ProcessResult {
    fn transitioned(outcome: TransitionOutcome, follow_ups: Vec<WorkItem>) -> Self {
        Self {
            follow_ups,
            notified: false,
            outcome: Some(outcome),
        }
    }
}

/// Totals of one [`AssignmentProcessor::drive`] call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DriveSummary {
    pub rounds: usize,
    pub processed: usize,
    pub notified: usize,
    pub failed: usize,
    /// Work was left over when the round limit was reached
    pub truncated: bool,
}

enum Prepared {
    Continue(FormationAssignment),
    Done(ProcessResult),
}

impl Prepared {
    fn done() -> Self {
        Self::Done(ProcessResult::default())
    }
}

/// Participants, templates and facts one notification is built from
struct NotificationContext {
    target: crate::models::Participant,
    webhook: Option<Webhook>,
    reverse: Option<FormationAssignment>,
    render: TemplateContext,
    facts: ConstraintFacts,
    resource: ResourceView,
    template_id: String,
}

impl NotificationContext {
    fn join_point(&self, join_point: JoinPoint) -> JoinPointContext {
        JoinPointContext::new(
            join_point,
            self.template_id.clone(),
            self.resource.clone(),
            self.render.clone(),
        )
        .with_facts(self.facts.clone())
    }

    fn status_join_point(&self, report: &StatusReport) -> JoinPointContext {
        JoinPointContext::new(
            JoinPoint::NotificationStatusReturned,
            self.template_id.clone(),
            self.resource.clone(),
            self.render.clone().with_status_report(report),
        )
        .with_facts(self.facts.clone())
    }

    /// Pick up the operation record written just before delivery
    fn refresh(&mut self, assignment: &FormationAssignment) {
        self.render = self.render.clone().with_assignment(assignment);
        self.facts = std::mem::take(&mut self.facts).with_assignment(assignment.clone());
    }

    fn notification_target(&self, assignment: &FormationAssignment) -> NotificationTarget {
        NotificationTarget {
            formation_id: assignment.formation_id(),
            assignment_id: Some(assignment.id),
            receiver: self.target.id.clone(),
            receiver_tenant: self.target.tenant.clone(),
        }
    }
}

/// Runs the notification pipeline for formation assignments
#[derive(Debug, Clone)]
pub struct AssignmentProcessor {
    core: Arc<EngineCore>,
}

impl AssignmentProcessor {
    pub fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }

    /// Process items and their follow-ups in rounds until nothing is left or the round
    /// limit is reached. Distinct keys in a round are processed concurrently.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub async fn drive(&self, items: Vec<WorkItem>) -> DriveSummary {
        let mut summary = DriveSummary::default();
        let mut pending = coalesce(items);
        let concurrency = self.core.settings.max_concurrent_notifications.max(1);

        while !pending.is_empty() {
            if summary.rounds >= self.core.settings.max_follow_up_rounds {
                warn!(
                    remaining = pending.len(),
                    rounds = summary.rounds,
                    "Follow-up round limit reached, remaining work is left for resynchronization"
                );
                summary.truncated = true;
                break;
            }
            summary.rounds += 1;

            let results: Vec<(AssignmentKey, EngineResult<ProcessResult>)> = stream::iter(pending)
                .map(|item| async move {
                    let key = item.key.clone();
                    (key, self.process(item).await)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

            let mut next = Vec::new();
            for (key, result) in results {
                summary.processed += 1;
                match result {
                    Ok(result) => {
                        if result.notified {
                            summary.notified += 1;
                        }
                        next.extend(result.follow_ups);
                    }
                    Err(error) => {
                        summary.failed += 1;
                        log_error(
                            "assignment_processor",
                            "process",
                            &error.to_string(),
                            Some(&key.to_string()),
                        );
                    }
                }
            }
            pending = coalesce(next);
        }

        debug!(
            rounds = summary.rounds,
            processed = summary.processed,
            notified = summary.notified,
            "Drive finished"
        );
        summary
    }

    /// Process a single work item under its key lock
    pub async fn process(&self, item: WorkItem) -> EngineResult<ProcessResult> {
        let _guard = self.core.assignment_locks.lock(&item.key).await;

        let Some(assignment) = self.core.stores.assignments.find_by_key(&item.key).await? else {
            debug!(assignment = %item.key, "Assignment no longer exists");
            return Ok(ProcessResult::default());
        };
        let Some(formation) = self
            .core
            .stores
            .formations
            .get_formation(item.key.formation_id)
            .await?
        else {
            return Ok(ProcessResult::default());
        };

        match self.prepare(&item, assignment).await? {
            Prepared::Continue(assignment) => {
                self.notify(&formation, assignment, item.trigger).await
            }
            Prepared::Done(result) => Ok(result),
        }
    }

    /// Apply a receiver's callback report
    pub async fn apply_callback(
        &self,
        key: &AssignmentKey,
        report: StatusReport,
    ) -> EngineResult<(StatusReportOutcome, Vec<WorkItem>)> {
        let _guard = self.core.assignment_locks.lock(key).await;

        let Some(assignment) = self.core.stores.assignments.find_by_key(key).await? else {
            return Ok((StatusReportOutcome::ignored("assignment not found"), Vec::new()));
        };
        if let Some(reason) = ignore_reason(&assignment, &report) {
            self.report_ignored(&assignment, &reason).await;
            return Ok((StatusReportOutcome::ignored(reason), Vec::new()));
        }
        let Some(formation) = self
            .core
            .stores
            .formations
            .get_formation(key.formation_id)
            .await?
        else {
            return Ok((StatusReportOutcome::ignored("formation not found"), Vec::new()));
        };
        let Some(ctx) = self
            .load_context(&formation, &assignment, assignment.operation_kind())
            .await?
        else {
            let reason = "participants are no longer registered";
            self.report_ignored(&assignment, reason).await;
            return Ok((StatusReportOutcome::ignored(reason), Vec::new()));
        };

        let result = self
            .apply_report(&assignment, report, ErrorCode::ClientError, &ctx, None, false)
            .await?;
        Ok((
            StatusReportOutcome::from_transition(result.outcome),
            result.follow_ups,
        ))
    }

    /// Receiver-driven reset of an established pair; the reverse is re-notified
    pub async fn reset(
        &self,
        key: &AssignmentKey,
        state: AssignmentState,
        configuration: Value,
    ) -> EngineResult<(FormationAssignment, Vec<WorkItem>)> {
        let _guard = self.core.assignment_locks.lock(key).await;

        let assignment = self
            .core
            .stores
            .assignments
            .find_by_key(key)
            .await?
            .ok_or_else(|| EngineError::not_found("FormationAssignment", key))?;
        let reverse = self.reverse_of(&assignment).await?;
        let reverse_ready = reverse
            .as_ref()
            .map(|r| r.state == AssignmentState::Ready)
            .unwrap_or(assignment.is_self());
        if assignment.state != AssignmentState::Ready || !reverse_ready {
            return Err(EngineError::Conflict(format!(
                "reset of {} requires it and its reverse to be READY",
                assignment.id
            )));
        }

        let outcome = self
            .transition(&assignment, AssignmentEvent::Reset { state, configuration })
            .await?
            .ok_or_else(|| {
                EngineError::Conflict(format!("assignment {} changed during reset", assignment.id))
            })?;

        let mut follow_ups = self.follow_ups(&assignment, &outcome).await?;
        if let Some(reverse) = reverse {
            follow_ups.push(WorkItem::renotify(reverse.key, true, OperationTrigger::Reset));
        }
        Ok((outcome.assignment().clone(), follow_ups))
    }

    /// Drop memberships of unassigning participants nothing references anymore
    pub async fn cleanup_memberships(&self, formation_id: Uuid) -> EngineResult<Vec<String>> {
        let mut removed = Vec::new();
        for member in self.core.stores.formations.list_members(formation_id).await? {
            if member.status != MemberStatus::Unassigning {
                continue;
            }
            let remaining = self
                .core
                .stores
                .assignments
                .list_for_participant(formation_id, &member.participant_id)
                .await?;
            if remaining.is_empty()
                && self
                    .core
                    .stores
                    .formations
                    .remove_member(formation_id, &member.participant_id)
                    .await?
            {
                log_formation_operation(
                    "unassign_participant",
                    formation_id,
                    Some(&member.participant_id),
                    "completed",
                    None,
                );
                removed.push(member.participant_id);
            }
        }
        Ok(removed)
    }

    /// Every assignment of the formation that still expects a notification
    pub async fn pending_work(
        &self,
        formation_id: Uuid,
        trigger: OperationTrigger,
    ) -> EngineResult<Vec<WorkItem>> {
        Ok(self
            .core
            .stores
            .assignments
            .list_for_formation(formation_id)
            .await?
            .into_iter()
            .filter(|a| a.state.is_in_progress() && !a.awaiting_callback)
            .map(|a| WorkItem::drive(a.key, trigger))
            .collect())
    }

    async fn prepare(
        &self,
        item: &WorkItem,
        assignment: FormationAssignment,
    ) -> EngineResult<Prepared> {
        use AssignmentState::*;

        match item.kind {
            WorkKind::Drive => {
                if assignment.state.is_in_progress() && !assignment.awaiting_callback {
                    Ok(Prepared::Continue(assignment))
                } else {
                    Ok(Prepared::done())
                }
            }
            WorkKind::Renotify { force } => {
                if !force {
                    let reverse_value = self.reverse_of(&assignment).await?.and_then(|r| r.value);
                    if assignment.notified_reverse_value == reverse_value {
                        return Ok(Prepared::done());
                    }
                }
                match assignment.state {
                    Ready => self.advance(&assignment, AssignmentEvent::Renotify).await,
                    // A receiver waiting for configuration is answered even with a report open
                    ConfigPending => Ok(Prepared::Continue(assignment)),
                    Initial if !assignment.awaiting_callback => Ok(Prepared::Continue(assignment)),
                    _ => Ok(Prepared::done()),
                }
            }
            WorkKind::Unassign => match assignment.state {
                Deleting | DeleteReady if !assignment.awaiting_callback => {
                    Ok(Prepared::Continue(assignment))
                }
                DeleteError => self.advance(&assignment, AssignmentEvent::Retry).await,
                state if state.is_unassign_phase() => Ok(Prepared::done()),
                // Never notified, so there is nothing to undo at the receiver
                Initial if assignment.last_operation.is_none() => {
                    let Some(deleting) = self
                        .transition(&assignment, AssignmentEvent::BeginDelete)
                        .await?
                    else {
                        return Ok(Prepared::done());
                    };
                    let result = self
                        .apply(deleting.assignment(), AssignmentEvent::Remove)
                        .await?;
                    Ok(Prepared::Done(result))
                }
                _ => self.advance(&assignment, AssignmentEvent::BeginDelete).await,
            },
            WorkKind::Resync => match assignment.state {
                CreateError | DeleteError => {
                    self.advance(&assignment, AssignmentEvent::Retry).await
                }
                state if state.is_in_progress() => Ok(Prepared::Continue(assignment)),
                _ => Ok(Prepared::done()),
            },
        }
    }

    async fn notify(
        &self,
        formation: &Formation,
        assignment: FormationAssignment,
        trigger: OperationTrigger,
    ) -> EngineResult<ProcessResult> {
        let kind = if assignment.state.is_unassign_phase() {
            OperationKind::Unassign
        } else {
            OperationKind::Assign
        };
        let unassign = kind == OperationKind::Unassign;

        if let Some(reason) = self.gate(formation, &assignment).await? {
            debug!(assignment = %assignment.key, reason = %reason, "Notification gated");
            return Ok(ProcessResult::default());
        }

        let Some(mut ctx) = self.load_context(formation, &assignment, kind).await? else {
            warn!(
                assignment = %assignment.key,
                "Participants are not registered, settling without a notification"
            );
            return self.settle_without_notification(&assignment, unassign).await;
        };
        let Some(webhook) = ctx.webhook.clone() else {
            debug!(assignment = %assignment.key, "Receiver has no webhook for this pair");
            return self.settle_without_notification(&assignment, unassign).await;
        };

        let generation = self
            .core
            .constraints
            .evaluate_generation(
                &ctx.join_point(JoinPoint::GenerateFormationAssignmentNotification),
            )
            .await;
        match generation {
            Ok(GenerationDecision::Generate) => {}
            Ok(GenerationDecision::Suppress { constraint, reason }) => {
                info!(
                    assignment = %assignment.key,
                    constraint = %constraint,
                    reason = %reason,
                    "Notification suppressed"
                );
                self.core
                    .publish(
                        events::NOTIFICATION_SUPPRESSED,
                        json!({
                            "assignment_id": assignment.id,
                            "formation_id": assignment.formation_id(),
                            "constraint": constraint,
                            "reason": reason,
                        }),
                    )
                    .await;
                return self.settle_without_notification(&assignment, unassign).await;
            }
            Err(error) => return self.fail(&assignment, unassign, error).await,
        }

        let Some(opened) = self
            .open_operation(&assignment, kind, trigger, &ctx, webhook.is_async())
            .await?
        else {
            return Ok(ProcessResult::default());
        };
        ctx.refresh(&opened);

        let rendered = self.core.renderer.render_notification(
            &webhook,
            &ctx.render,
            ctx.notification_target(&opened),
        );
        let notification = match rendered {
            Ok(notification) => notification,
            Err(error) => return self.fail(&opened, unassign, EngineError::from(error)).await,
        };

        let send = self
            .core
            .constraints
            .evaluate_send(&ctx.join_point(JoinPoint::SendNotification), notification)
            .await;
        let (notification, fan_out) = match send {
            Ok(SendDecision::Deliver {
                notification,
                fan_out,
            }) => (*notification, fan_out),
            Ok(SendDecision::Defer { constraint }) => {
                return self.defer(&assignment, &opened, &constraint).await
            }
            Err(error) => return self.fail(&opened, unassign, error).await,
        };

        let mut outcome = self.core.dispatcher.dispatch(&notification).await;
        for destination in &fan_out {
            let extra = self
                .core
                .dispatcher
                .dispatch_to(&notification, destination, notification.mode)
                .await;
            if extra.is_failure() && !outcome.is_failure() {
                outcome = extra;
            }
        }
        self.core
            .publish(
                events::NOTIFICATION_DISPATCHED,
                json!({
                    "assignment_id": opened.id,
                    "formation_id": opened.formation_id(),
                    "operation": notification.operation.as_str(),
                    "operation_id": opened.operation_id(),
                    "destination": notification.destination.to_string(),
                    "fan_out": fan_out.len(),
                    "outcome": outcome.label(),
                }),
            )
            .await;

        let mut result = match outcome {
            DispatchOutcome::Acknowledged { status_code } => {
                debug!(
                    assignment = %opened.key,
                    status_code,
                    "Receiver acknowledged, awaiting status report"
                );
                ProcessResult::default()
            }
            DispatchOutcome::Reported { report, error_code } => {
                self.apply_report(&opened, report, error_code, &ctx, Some(&notification), true)
                    .await?
            }
        };
        result.notified = true;
        Ok(result)
    }

    /// Shared tail of the sync and callback paths
    async fn apply_report(
        &self,
        assignment: &FormationAssignment,
        report: StatusReport,
        error_code: ErrorCode,
        ctx: &NotificationContext,
        notification: Option<&Notification>,
        synchronous: bool,
    ) -> EngineResult<ProcessResult> {
        let unassign = assignment.state.is_unassign_phase();

        let evaluated = self
            .core
            .constraints
            .evaluate_status_returned(&ctx.status_join_point(&report), report)
            .await;
        let (StatusDecision { report, secondary }, error_code) = match evaluated {
            Ok(decision) => (decision, error_code),
            Err(error) => (
                StatusDecision {
                    report: StatusReport::new(failure_state(unassign))
                        .with_error(error.to_string()),
                    secondary: None,
                },
                ErrorCode::TechnicalError,
            ),
        };

        let finalize = synchronous && secondary.is_none();
        let event = match report_event(&report, unassign, error_code, finalize) {
            Ok(event) => event,
            Err(reason) => {
                self.report_ignored(assignment, &reason).await;
                return Ok(ProcessResult::default());
            }
        };

        let outcome = match self.core.assignment_machine.transition(assignment, event).await {
            Ok(outcome) => outcome,
            Err(error @ StateMachineError::InvalidTransition { .. }) => {
                self.report_ignored(assignment, &error.to_string()).await;
                return Ok(ProcessResult::default());
            }
            Err(error) if error.is_stale() => {
                debug!(assignment_id = %assignment.id, "Dropping stale status report");
                return Ok(ProcessResult::default());
            }
            Err(error) => return Err(error.into()),
        };
        let mut follow_ups = self.follow_ups(assignment, &outcome).await?;

        let pending_confirmation = match (&outcome, secondary) {
            (TransitionOutcome::Updated(intermediate), Some(destination))
                if matches!(
                    intermediate.state,
                    AssignmentState::CreateReady | AssignmentState::DeleteReady
                ) =>
            {
                Some((intermediate.clone(), destination))
            }
            _ => None,
        };

        let outcome = match pending_confirmation {
            Some((intermediate, destination)) => {
                let confirmed = self
                    .confirm(&intermediate, &destination, ctx, notification)
                    .await?;
                follow_ups.extend(confirmed.follow_ups);
                confirmed.outcome.unwrap_or(outcome)
            }
            None => outcome,
        };

        Ok(ProcessResult::transitioned(outcome, follow_ups))
    }

    /// Confirm an intermediate result at a secondary destination
    async fn confirm(
        &self,
        intermediate: &FormationAssignment,
        destination: &Destination,
        ctx: &NotificationContext,
        notification: Option<&Notification>,
    ) -> EngineResult<ProcessResult> {
        let unassign = intermediate.state.is_unassign_phase();

        let rendered;
        let notification = match notification {
            Some(notification) => notification,
            None => {
                let Some(webhook) = ctx.webhook.as_ref() else {
                    let error = EngineError::InvalidInput(format!(
                        "no webhook to confirm {} with",
                        intermediate.id
                    ));
                    return self.fail(intermediate, unassign, error).await;
                };
                match self.core.renderer.render_notification(
                    webhook,
                    &ctx.render,
                    ctx.notification_target(intermediate),
                ) {
                    Ok(notification) => {
                        rendered = notification;
                        &rendered
                    }
                    Err(error) => return self.fail(intermediate, unassign, error.into()).await,
                }
            }
        };

        let outcome = self
            .core
            .dispatcher
            .dispatch_to(notification, destination, WebhookMode::Sync)
            .await;
        info!(
            assignment = %intermediate.key,
            destination = %destination,
            outcome = outcome.label(),
            "Secondary confirmation finished"
        );

        let event = match outcome {
            DispatchOutcome::Reported { report, error_code } if report.is_error() => {
                let message = report
                    .error
                    .unwrap_or_else(|| REPORTED_ERROR_WITHOUT_MESSAGE.to_string());
                AssignmentEvent::fail(unassign, AssignmentError::new(message, error_code))
            }
            _ if unassign => AssignmentEvent::Remove,
            _ => AssignmentEvent::Complete(None),
        };
        self.apply(intermediate, event).await
    }

    async fn gate(
        &self,
        formation: &Formation,
        assignment: &FormationAssignment,
    ) -> EngineResult<Option<String>> {
        let members = self.core.stores.formations.list_members(formation.id).await?;
        let ctx = GuardContext {
            formation,
            members: &members,
            assignments: self.core.stores.assignments.as_ref(),
        };

        for guard in dispatch_guards() {
            if let Err(error) = guard.check(assignment, &ctx).await {
                return Ok(Some(format!("{}: {error}", guard.description())));
            }
        }
        Ok(None)
    }

    async fn load_context(
        &self,
        formation: &Formation,
        assignment: &FormationAssignment,
        kind: OperationKind,
    ) -> EngineResult<Option<NotificationContext>> {
        let directory = &self.core.stores.directory;
        let Some(source) = directory.get_participant(assignment.source()).await? else {
            return Ok(None);
        };
        let target = if assignment.is_self() {
            source.clone()
        } else {
            match directory.get_participant(assignment.target()).await? {
                Some(target) => target,
                None => return Ok(None),
            }
        };
        let reverse = self.reverse_of(assignment).await?;

        let render = TemplateContext::new(NotificationOperation::from(kind))
            .with_formation(formation)
            .with_source(&source)
            .with_target(&target)
            .with_assignment(assignment)
            .with_reverse_assignment(reverse.as_ref())
            .with_customer(formation.tenant.clone(), target.local_tenant_id.clone());
        let facts = ConstraintFacts::new()
            .with_participant(target.clone())
            .with_assignment(assignment.clone())
            .with_reverse(reverse.clone());

        Ok(Some(NotificationContext {
            webhook: target.notification_webhook(source.participant_type).cloned(),
            resource: ResourceView::from(&target),
            template_id: formation.template_id.clone(),
            facts: facts.with_source(source).with_target(target.clone()),
            target,
            reverse,
            render,
        }))
    }

    async fn reverse_of(
        &self,
        assignment: &FormationAssignment,
    ) -> EngineResult<Option<FormationAssignment>> {
        if assignment.is_self() {
            return Ok(None);
        }
        Ok(self
            .core
            .stores
            .assignments
            .find_by_key(&assignment.key.reverse())
            .await?)
    }

    /// Write the correlation data of the request about to be sent
    async fn open_operation(
        &self,
        assignment: &FormationAssignment,
        kind: OperationKind,
        trigger: OperationTrigger,
        ctx: &NotificationContext,
        awaiting_callback: bool,
    ) -> EngineResult<Option<FormationAssignment>> {
        let operation = match &assignment.last_operation {
            Some(operation) if operation.is_open() && operation.kind == kind => operation.clone(),
            _ => AssignmentOperation::start(self.core.next_operation_id(), kind, trigger),
        };

        let mut updated = assignment.clone();
        updated.last_operation = Some(operation);
        updated.awaiting_callback = awaiting_callback;
        updated.deferred = false;
        updated.notified_reverse_value = ctx.reverse.as_ref().and_then(|r| r.value.clone());
        self.update(assignment, updated).await
    }

    async fn defer(
        &self,
        before: &FormationAssignment,
        opened: &FormationAssignment,
        constraint: &str,
    ) -> EngineResult<ProcessResult> {
        let mut updated = opened.clone();
        updated.deferred = true;
        updated.awaiting_callback = false;
        updated.notified_reverse_value = before.notified_reverse_value.clone();

        if let Some(deferred) = self.update(opened, updated).await? {
            info!(
                assignment = %deferred.key,
                constraint = %constraint,
                "Notification deferred until the reverse assignment is READY"
            );
            self.core
                .publish(
                    events::NOTIFICATION_DEFERRED,
                    json!({
                        "assignment_id": deferred.id,
                        "formation_id": deferred.formation_id(),
                        "constraint": constraint,
                    }),
                )
                .await;

            // Both halves of a pair deferred in the same round; release the reverse
            if let Some(reverse) = self.reverse_of(&deferred).await? {
                if reverse.deferred {
                    return Ok(ProcessResult {
                        follow_ups: vec![WorkItem::drive(reverse.key, OperationTrigger::FollowUp)],
                        ..ProcessResult::default()
                    });
                }
            }
        }
        Ok(ProcessResult::default())
    }

    async fn update(
        &self,
        assignment: &FormationAssignment,
        updated: FormationAssignment,
    ) -> EngineResult<Option<FormationAssignment>> {
        match self.core.assignment_machine.update_fields(assignment, updated).await {
            Ok(written) => Ok(Some(written)),
            Err(error) if error.is_stale() => {
                debug!(assignment_id = %assignment.id, "Dropping stale field update");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// A pair with nothing to send completes as if the receiver had accepted it
    async fn settle_without_notification(
        &self,
        assignment: &FormationAssignment,
        unassign: bool,
    ) -> EngineResult<ProcessResult> {
        let event = if unassign {
            AssignmentEvent::Remove
        } else {
            AssignmentEvent::Complete(None)
        };
        self.apply(assignment, event).await
    }

    async fn fail(
        &self,
        assignment: &FormationAssignment,
        unassign: bool,
        error: EngineError,
    ) -> EngineResult<ProcessResult> {
        warn!(assignment = %assignment.key, error = %error, "Notification could not be built");
        let error = AssignmentError::technical(error.to_string());
        self.apply(assignment, AssignmentEvent::fail(unassign, error)).await
    }

    async fn transition(
        &self,
        assignment: &FormationAssignment,
        event: AssignmentEvent,
    ) -> EngineResult<Option<TransitionOutcome>> {
        match self.core.assignment_machine.transition(assignment, event).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(error) if error.is_stale() => {
                debug!(assignment_id = %assignment.id, error = %error, "Dropping stale transition");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn advance(
        &self,
        assignment: &FormationAssignment,
        event: AssignmentEvent,
    ) -> EngineResult<Prepared> {
        Ok(match self.transition(assignment, event).await? {
            Some(TransitionOutcome::Updated(updated)) => Prepared::Continue(updated),
            _ => Prepared::done(),
        })
    }

    async fn apply(
        &self,
        assignment: &FormationAssignment,
        event: AssignmentEvent,
    ) -> EngineResult<ProcessResult> {
        let Some(outcome) = self.transition(assignment, event).await? else {
            return Ok(ProcessResult::default());
        };
        let follow_ups = self.follow_ups(assignment, &outcome).await?;
        Ok(ProcessResult::transitioned(outcome, follow_ups))
    }

    /// Work released by a transition
    async fn follow_ups(
        &self,
        before: &FormationAssignment,
        outcome: &TransitionOutcome,
    ) -> EngineResult<Vec<WorkItem>> {
        use AssignmentState::*;

        let assignments = &self.core.stores.assignments;
        let mut items = Vec::new();

        match outcome {
            TransitionOutcome::Updated(updated) => {
                if updated.state == Ready && before.state != Ready {
                    if updated.is_self() {
                        let pairs = assignments
                            .list_for_participant(updated.formation_id(), updated.source())
                            .await?;
                        items.extend(
                            pairs
                                .into_iter()
                                .filter(|p| {
                                    !p.is_self() && p.state == Initial && !p.awaiting_callback
                                })
                                .map(|p| WorkItem::drive(p.key, OperationTrigger::FollowUp)),
                        );
                    } else if let Some(reverse) =
                        assignments.find_by_key(&updated.key.reverse()).await?
                    {
                        if reverse.deferred {
                            items.push(WorkItem::drive(reverse.key, OperationTrigger::FollowUp));
                        }
                    }
                }

                // The reverse configuration may have changed while this request was outstanding
                let settled = match updated.state {
                    Ready => !updated.awaiting_callback,
                    ConfigPending => true,
                    _ => false,
                };
                if settled && !updated.is_self() {
                    if let Some(reverse) = assignments.find_by_key(&updated.key.reverse()).await? {
                        if reverse.value.is_some()
                            && reverse.value != updated.notified_reverse_value
                        {
                            items.push(WorkItem::renotify(
                                updated.key.clone(),
                                false,
                                OperationTrigger::FollowUp,
                            ));
                        }
                    }
                }

                if !updated.is_self() && updated.value.is_some() && updated.value != before.value {
                    items.push(WorkItem::renotify(
                        updated.key.reverse(),
                        false,
                        OperationTrigger::FollowUp,
                    ));
                }
            }
            TransitionOutcome::Removed(removed) => {
                let key = &removed.key;
                let mut candidates = vec![
                    AssignmentKey::self_assignment(
                        key.formation_id,
                        key.source.clone(),
                        key.source_type,
                    ),
                    AssignmentKey::self_assignment(
                        key.formation_id,
                        key.target.clone(),
                        key.target_type,
                    ),
                ];
                if !key.is_self() {
                    candidates.push(key.reverse());
                }
                candidates.sort();
                candidates.dedup();

                for candidate in candidates.iter().filter(|c| *c != key) {
                    if let Some(waiting) = assignments.find_by_key(candidate).await? {
                        if matches!(waiting.state, Deleting | DeleteReady)
                            && !waiting.awaiting_callback
                        {
                            items.push(WorkItem::drive(waiting.key, OperationTrigger::FollowUp));
                        }
                    }
                }
            }
        }

        Ok(items)
    }

    async fn report_ignored(&self, assignment: &FormationAssignment, reason: &str) {
        info!(assignment_id = %assignment.id, reason = %reason, "Status report ignored");
        self.core
            .publish(
                events::STATUS_REPORT_IGNORED,
                json!({
                    "assignment_id": assignment.id,
                    "formation_id": assignment.formation_id(),
                    "reason": reason,
                }),
            )
            .await;
    }
}

/// One item per key, keeping the strongest kind
fn coalesce(items: Vec<WorkItem>) -> Vec<WorkItem> {
    let mut by_key: BTreeMap<AssignmentKey, WorkItem> = BTreeMap::new();
    for item in items {
        match by_key.entry(item.key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
            Entry::Occupied(mut slot) => {
                if item.kind.rank() > slot.get().kind.rank() {
                    slot.insert(item);
                }
            }
        }
    }
    by_key.into_values().collect()
}
