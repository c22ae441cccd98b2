//! # Formation Lifecycle
//!
//! Create and delete notifications for the formation itself, sent through the formation
//! template's lifecycle webhook. A template without one, or a suppressed notification,
//! completes the lifecycle step immediately.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::core::EngineCore;
use crate::constants::events;
use crate::constants::messages::{DEFERRAL_NOT_SUPPORTED, REPORTED_ERROR_WITHOUT_MESSAGE};
use crate::constraints::{ConstraintFacts, GenerationDecision, JoinPointContext, SendDecision};
use crate::dispatch::DispatchOutcome;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AssignmentError, ErrorCode, Formation, FormationStatusReportRequest, JoinPoint,
    NotificationOperation, WebhookKind,
};
use crate::state_machine::{FormationEvent, FormationState};
use crate::templates::{NotificationTarget, ResourceView, TemplateContext};

/// Which lifecycle notification to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Create,
    Delete,
}

impl LifecyclePhase {
    fn operation(&self) -> NotificationOperation {
        match self {
            Self::Create => NotificationOperation::CreateFormation,
            Self::Delete => NotificationOperation::DeleteFormation,
        }
    }
}

/// Lifecycle notifications and formation status reports
#[derive(Debug, Clone)]
pub struct FormationLifecycle {
    core: Arc<EngineCore>,
}

impl FormationLifecycle {
    pub fn new(core: Arc<EngineCore>) -> Self {
        Self { core }
    }

    /// Send the lifecycle notification for `phase`; `None` once the formation is removed
    pub async fn notify(
        &self,
        formation: Formation,
        phase: LifecyclePhase,
    ) -> EngineResult<Option<Formation>> {
        let template = self
            .core
            .stores
            .directory
            .get_template(&formation.template_id)
            .await?;
        let webhook = template
            .as_ref()
            .and_then(|t| t.webhook.clone())
            .filter(|w| w.kind == WebhookKind::FormationLifecycle);
        let Some(webhook) = webhook else {
            debug!(formation_id = %formation.id, "Template has no lifecycle webhook");
            return self.apply(&formation, FormationEvent::LifecycleSucceeded).await;
        };

        let render = TemplateContext::new(phase.operation())
            .with_formation(&formation)
            .with_customer(formation.tenant.clone(), None);
        let join_point = |join_point| {
            JoinPointContext::new(
                join_point,
                formation.template_id.clone(),
                ResourceView::from(&formation),
                render.clone(),
            )
            .with_facts(ConstraintFacts::new().with_formation_id(formation.id))
        };

        match self
            .core
            .constraints
            .evaluate_generation(&join_point(JoinPoint::GenerateFormationNotification))
            .await
        {
            Ok(GenerationDecision::Generate) => {}
            Ok(GenerationDecision::Suppress { constraint, reason }) => {
                info!(
                    formation_id = %formation.id,
                    constraint = %constraint,
                    "Lifecycle notification suppressed"
                );
                self.core
                    .publish(
                        events::NOTIFICATION_SUPPRESSED,
                        json!({
                            "formation_id": formation.id,
                            "constraint": constraint,
                            "reason": reason,
                        }),
                    )
                    .await;
                return self.apply(&formation, FormationEvent::LifecycleSucceeded).await;
            }
            Err(error) => return self.fail(&formation, error).await,
        }

        let target = NotificationTarget {
            formation_id: formation.id,
            assignment_id: None,
            receiver: formation.template_id.clone(),
            receiver_tenant: formation.tenant.clone(),
        };
        let notification = match self.core.renderer.render_notification(&webhook, &render, target) {
            Ok(notification) => notification,
            Err(error) => return self.fail(&formation, error.into()).await,
        };

        let send = self
            .core
            .constraints
            .evaluate_send(&join_point(JoinPoint::SendNotification), notification)
            .await;
        let (notification, fan_out) = match send {
            Ok(SendDecision::Deliver {
                notification,
                fan_out,
            }) => (*notification, fan_out),
            Ok(SendDecision::Defer { constraint }) => {
                warn!(
                    formation_id = %formation.id,
                    constraint = %constraint,
                    "{}",
                    DEFERRAL_NOT_SUPPORTED
                );
                return self
                    .apply(
                        &formation,
                        FormationEvent::LifecycleFailed(AssignmentError::technical(
                            DEFERRAL_NOT_SUPPORTED,
                        )),
                    )
                    .await;
            }
            Err(error) => return self.fail(&formation, error).await,
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
                    "formation_id": formation.id,
                    "operation": notification.operation.as_str(),
                    "destination": notification.destination.to_string(),
                    "outcome": outcome.label(),
                }),
            )
            .await;

        match outcome {
            DispatchOutcome::Acknowledged { .. } => {
                match self.core.formation_machine.mark_awaiting_callback(&formation).await {
                    Ok(formation) => Ok(Some(formation)),
                    Err(error) if error.is_stale() => self.current(formation.id).await,
                    Err(error) => Err(error.into()),
                }
            }
            DispatchOutcome::Reported { report, error_code } => {
                if report.is_error() {
                    let message = report
                        .error
                        .unwrap_or_else(|| REPORTED_ERROR_WITHOUT_MESSAGE.to_string());
                    self.apply(
                        &formation,
                        FormationEvent::LifecycleFailed(AssignmentError::new(message, error_code)),
                    )
                    .await
                } else {
                    self.apply(&formation, FormationEvent::LifecycleSucceeded).await
                }
            }
        }
    }

    /// Send the delete notification once the last assignment of a deleting formation is gone
    pub async fn finish_delete_if_drained(
        &self,
        formation_id: Uuid,
    ) -> EngineResult<Option<Formation>> {
        let Some(formation) = self.core.stores.formations.get_formation(formation_id).await? else {
            return Ok(None);
        };
        if formation.state != FormationState::Deleting || formation.awaiting_callback {
            return Ok(Some(formation));
        }
        let remaining = self
            .core
            .stores
            .assignments
            .list_for_formation(formation_id)
            .await?;
        if !remaining.is_empty() {
            debug!(
                formation_id = %formation_id,
                remaining = remaining.len(),
                "Formation still has assignments"
            );
            return Ok(Some(formation));
        }
        self.notify(formation, LifecyclePhase::Delete).await
    }

    /// Apply a lifecycle callback to a formation awaiting one
    pub async fn report_status(
        &self,
        formation_id: Uuid,
        request: FormationStatusReportRequest,
    ) -> EngineResult<FormationReportOutcome> {
        let formation = self
            .core
            .stores
            .formations
            .get_formation(formation_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Formation", formation_id))?;
        if formation.is_draft() {
            return Err(EngineError::invalid_formation_state(
                formation_id,
                "status report",
                "draft formations have no lifecycle notification",
            ));
        }
        if !formation.awaiting_callback {
            info!(formation_id = %formation_id, "Formation status report ignored");
            self.core
                .publish(
                    events::STATUS_REPORT_IGNORED,
                    json!({
                        "formation_id": formation_id,
                        "reason": "formation is not awaiting a status report",
                    }),
                )
                .await;
            return Ok(FormationReportOutcome::Ignored(formation));
        }

        let report = request
            .into_report(formation.state)
            .map_err(EngineError::InvalidStatusReport)?;
        let event = if report.state.is_error() {
            let message = report
                .error
                .unwrap_or_else(|| REPORTED_ERROR_WITHOUT_MESSAGE.to_string());
            FormationEvent::LifecycleFailed(AssignmentError::new(message, ErrorCode::ClientError))
        } else {
            FormationEvent::LifecycleSucceeded
        };

        Ok(match self.apply(&formation, event).await? {
            Some(updated) => FormationReportOutcome::Applied(updated),
            None => FormationReportOutcome::Removed,
        })
    }

    async fn apply(
        &self,
        formation: &Formation,
        event: FormationEvent,
    ) -> EngineResult<Option<Formation>> {
        match self.core.formation_machine.transition(formation, event).await {
            Ok(updated) => Ok(updated),
            Err(error) if error.is_stale() => {
                debug!(formation_id = %formation.id, "Dropping stale formation transition");
                self.current(formation.id).await
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn fail(
        &self,
        formation: &Formation,
        error: EngineError,
    ) -> EngineResult<Option<Formation>> {
        warn!(
            formation_id = %formation.id,
            error = %error,
            "Lifecycle notification could not be built"
        );
        self.apply(
            formation,
            FormationEvent::LifecycleFailed(AssignmentError::technical(error.to_string())),
        )
        .await
    }

    async fn current(&self, formation_id: Uuid) -> EngineResult<Option<Formation>> {
        Ok(self.core.stores.formations.get_formation(formation_id).await?)
    }
}

/// What happened to a formation status report
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "formation", rename_all = "snake_case")]
pub enum FormationReportOutcome {
    Applied(Formation),
    Removed,
    Ignored(Formation),
}
