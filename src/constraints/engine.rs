use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::facts::ConstraintFacts;
use super::operators::{
    apply_config_mutator, apply_redirect, secondary_confirmation_state, should_defer,
    ConstraintOperator, FlowControlBehavior, GateVerdict,
};
use super::registry::OperatorRegistry;
use super::ConstraintError;
use crate::error::{EngineError, EngineResult};
use crate::logging::log_constraint_evaluation;
use crate::models::{Constraint, Destination, JoinPoint, NewConstraint, Notification, StatusReport};
use crate::store::{ConstraintStore, StoreError};
use crate::templates::{ContextShape, ResourceView, TemplateContext, TemplateRenderer};

/// Everything one join point evaluation needs
#[derive(Debug, Clone)]
pub struct JoinPointContext {
    pub join_point: JoinPoint,
    /// Template of the formation the operation happens in
    pub template_id: String,
    /// Resource applicability is matched against
    pub resource: ResourceView,
    pub render: TemplateContext,
    pub facts: ConstraintFacts,
}

impl JoinPointContext {
    pub fn new(
        join_point: JoinPoint,
        template_id: impl Into<String>,
        resource: ResourceView,
        render: TemplateContext,
    ) -> Self {
        let render = render
            .with_join_point(join_point)
            .with_resource(resource.clone());
        Self {
            join_point,
            template_id: template_id.into(),
            resource,
            render,
            facts: ConstraintFacts::default(),
        }
    }

    pub fn with_facts(mut self, facts: ConstraintFacts) -> Self {
        self.facts = facts;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationDecision {
    Generate,
    Suppress { constraint: String, reason: String },
}

#[derive(Debug, Clone)]
pub enum SendDecision {
    Deliver {
        notification: Box<Notification>,
        /// Additional receivers of the same request
        fan_out: Vec<Destination>,
    },
    Defer {
        constraint: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusDecision {
    pub report: StatusReport,
    /// Set when the result must be confirmed at a second destination before it is final
    pub secondary: Option<Destination>,
}

/// Evaluates attached constraints at join points
pub struct ConstraintEngine {
    store: Arc<dyn ConstraintStore>,
    renderer: Arc<TemplateRenderer>,
    registry: OperatorRegistry,
}

impl std::fmt::Debug for ConstraintEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstraintEngine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ConstraintEngine {
    pub fn new(store: Arc<dyn ConstraintStore>, renderer: Arc<TemplateRenderer>) -> Self {
        Self {
            store,
            renderer,
            registry: OperatorRegistry::new(),
        }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Validate and attach a constraint
    pub async fn attach(&self, constraint: NewConstraint) -> EngineResult<Constraint> {
        self.registry.validate(&constraint)?;
        if !constraint.input_template.trim().is_empty() {
            self.renderer
                .compile(&constraint.input_template)
                .and_then(|template| template.check_paths(ContextShape::Constraint))
                .map_err(ConstraintError::from)?;
        }

        let attached = self.store.attach(constraint).await?;
        info!(
            constraint_id = %attached.id,
            name = %attached.name,
            operator = %attached.operator,
            join_point = %attached.join_point,
            "Constraint attached"
        );
        Ok(attached)
    }

    pub async fn detach(&self, id: Uuid) -> EngineResult<Constraint> {
        let detached = self.store.detach(id).await.map_err(|e| match e {
            StoreError::NotFound { .. } => EngineError::not_found("Constraint", id),
            other => other.into(),
        })?;
        info!(constraint_id = %id, name = %detached.name, "Constraint detached");
        Ok(detached)
    }

    pub async fn list(&self) -> EngineResult<Vec<Constraint>> {
        Ok(self.store.list_constraints().await?)
    }

    /// Management join points: the first failing gate rejects the operation
    pub async fn enforce(&self, ctx: &JoinPointContext) -> EngineResult<()> {
        for (constraint, operator) in self.prepare(ctx).await? {
            let ConstraintOperator::Gate(gate) = operator else {
                self.skip(&constraint, ctx, &operator);
                continue;
            };
            match gate.evaluate(&ctx.facts) {
                GateVerdict::Pass => self.record(&constraint, ctx, "passed", None),
                GateVerdict::Fail(reason) => {
                    self.record(&constraint, ctx, "rejected", Some(&reason));
                    return Err(EngineError::ConstraintViolation {
                        constraint: constraint.name,
                        reason,
                    });
                }
            }
        }
        Ok(())
    }

    /// Generation join points: a failing gate suppresses the notification
    pub async fn evaluate_generation(
        &self,
        ctx: &JoinPointContext,
    ) -> EngineResult<GenerationDecision> {
        for (constraint, operator) in self.prepare(ctx).await? {
            let ConstraintOperator::Gate(gate) = operator else {
                self.skip(&constraint, ctx, &operator);
                continue;
            };
            match gate.evaluate(&ctx.facts) {
                GateVerdict::Pass => self.record(&constraint, ctx, "passed", None),
                GateVerdict::Fail(reason) => {
                    self.record(&constraint, ctx, "suppressed", Some(&reason));
                    return Ok(GenerationDecision::Suppress {
                        constraint: constraint.name,
                        reason,
                    });
                }
            }
        }
        Ok(GenerationDecision::Generate)
    }

    /// Before delivery: redirects apply in order, a deferral stops evaluation
    pub async fn evaluate_send(
        &self,
        ctx: &JoinPointContext,
        mut notification: Notification,
    ) -> EngineResult<SendDecision> {
        let mut fan_out = Vec::new();

        for (constraint, operator) in self.prepare(ctx).await? {
            match &operator {
                ConstraintOperator::Redirect(input) => {
                    let redirected = apply_redirect(
                        input,
                        &notification.destination,
                        &notification.receiver_tenant,
                    );
                    match redirected {
                        Some(destination) => {
                            let details = destination.to_string();
                            notification.destination = destination;
                            self.record(&constraint, ctx, "redirected", Some(&details));
                        }
                        None => self.record(&constraint, ctx, "not_applicable", None),
                    }
                }
                ConstraintOperator::FlowControl(FlowControlBehavior::DeferUntilReverseReady) => {
                    if should_defer(&ctx.facts) {
                        self.record(&constraint, ctx, "deferred", None);
                        return Ok(SendDecision::Defer {
                            constraint: constraint.name,
                        });
                    }
                    self.record(&constraint, ctx, "not_deferred", None);
                }
                ConstraintOperator::FlowControl(FlowControlBehavior::FanOut { destinations }) => {
                    fan_out.extend(destinations.iter().cloned());
                    let details = format!("{} extra destinations", destinations.len());
                    self.record(&constraint, ctx, "fanned_out", Some(&details));
                }
                _ => self.skip(&constraint, ctx, &operator),
            }
        }

        Ok(SendDecision::Deliver {
            notification: Box::new(notification),
            fan_out,
        })
    }

    /// After a status is known: mutators rewrite the report, last writer wins
    pub async fn evaluate_status_returned(
        &self,
        ctx: &JoinPointContext,
        report: StatusReport,
    ) -> EngineResult<StatusDecision> {
        let unassign = ctx.render.operation.is_removal();
        let mut decision = StatusDecision {
            report,
            secondary: None,
        };

        for (constraint, operator) in self.prepare(ctx).await? {
            match &operator {
                ConstraintOperator::Mutator(input) => {
                    let before = decision.report.state;
                    decision.report = apply_config_mutator(input, decision.report, &ctx.facts);
                    let details = format!("{before} -> {}", decision.report.state);
                    self.record(&constraint, ctx, "mutated", Some(&details));
                }
                ConstraintOperator::FlowControl(FlowControlBehavior::SecondaryConfirmation {
                    url,
                    method,
                }) => match secondary_confirmation_state(&decision.report, unassign) {
                    Some(state) => {
                        decision.report.state = state;
                        let destination = Destination::new(
                            method.clone().unwrap_or_else(|| "POST".to_string()),
                            url.clone(),
                        );
                        let details = destination.to_string();
                        decision.secondary = Some(destination);
                        self.record(&constraint, ctx, "confirmation_required", Some(&details));
                    }
                    None => self.record(&constraint, ctx, "not_applicable", None),
                },
                _ => self.skip(&constraint, ctx, &operator),
            }
        }

        Ok(decision)
    }

    async fn prepare(
        &self,
        ctx: &JoinPointContext,
    ) -> EngineResult<Vec<(Constraint, ConstraintOperator)>> {
        let constraints = self.store.list_for_join_point(ctx.join_point).await?;
        let mut prepared = Vec::with_capacity(constraints.len());

        for constraint in constraints {
            if !constraint.applies_to(
                ctx.resource.resource_type,
                ctx.resource.subtype.as_deref(),
                &ctx.template_id,
            ) {
                continue;
            }
            let input = if constraint.input_template.trim().is_empty() {
                serde_json::Value::Null
            } else {
                self.renderer
                    .render_value(&constraint.input_template, &ctx.render, "constraint input")
                    .map_err(ConstraintError::from)?
            };
            let operator = self.registry.instantiate(constraint.operator, input)?;
            prepared.push((constraint, operator));
        }

        Ok(prepared)
    }

    fn record(
        &self,
        constraint: &Constraint,
        ctx: &JoinPointContext,
        outcome: &str,
        details: Option<&str>,
    ) {
        log_constraint_evaluation(
            &constraint.name,
            &constraint.operator.to_string(),
            ctx.join_point.as_str(),
            outcome,
            details,
        );
    }

    fn skip(&self, constraint: &Constraint, ctx: &JoinPointContext, operator: &ConstraintOperator) {
        warn!(
            constraint = %constraint.name,
            join_point = %ctx.join_point,
            kind = operator.kind(),
            "Operator has no effect at this join point"
        );
    }
}
