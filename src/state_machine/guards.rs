use async_trait::async_trait;

use super::errors::{business_rule_violation, dependencies_not_met, GuardResult};
use super::states::AssignmentState;
use crate::models::{AssignmentKey, Formation, FormationAssignment, FormationMember, MemberStatus};
use crate::store::AssignmentStore;

/// What a dispatch guard may look at besides the assignment itself
pub struct GuardContext<'a> {
    pub formation: &'a Formation,
    pub members: &'a [FormationMember],
    pub assignments: &'a dyn AssignmentStore,
}

impl GuardContext<'_> {
    fn is_unassigning(&self, participant_id: &str) -> bool {
        self.members
            .iter()
            .any(|m| m.participant_id == participant_id && m.status == MemberStatus::Unassigning)
    }
}

/// Trait for implementing dispatch guards
#[async_trait]
pub trait StateGuard<T: Sync>: Send + Sync {
    /// Err when the entity must wait before it is notified
    async fn check(&self, entity: &T, ctx: &GuardContext<'_>) -> GuardResult<()>;

    /// Get a description of this guard for logging
    fn description(&self) -> &'static str;
}

/// Notifications only go out while the formation lifecycle allows them
pub struct FormationAcceptsNotificationsGuard;

#[async_trait]
impl StateGuard<FormationAssignment> for FormationAcceptsNotificationsGuard {
    async fn check(
        &self,
        assignment: &FormationAssignment,
        ctx: &GuardContext<'_>,
    ) -> GuardResult<()> {
        let allowed = if assignment.state.is_unassign_phase() {
            ctx.formation.allows_unassign_notifications()
        } else {
            ctx.formation.allows_assign_notifications()
        };

        if allowed {
            Ok(())
        } else {
            Err(business_rule_violation(format!(
                "formation {} is {}",
                ctx.formation.id, ctx.formation.state
            )))
        }
    }

    fn description(&self) -> &'static str {
        "Formation lifecycle must allow notifications"
    }
}

/// Cross-pair assign notifications wait for both self-assignments
pub struct SelfAssignmentsReadyGuard;

#[async_trait]
impl StateGuard<FormationAssignment> for SelfAssignmentsReadyGuard {
    async fn check(
        &self,
        assignment: &FormationAssignment,
        ctx: &GuardContext<'_>,
    ) -> GuardResult<()> {
        if assignment.is_self() || assignment.state.is_unassign_phase() {
            return Ok(());
        }

        let key = &assignment.key;
        for (participant, participant_type) in
            [(&key.source, key.source_type), (&key.target, key.target_type)]
        {
            let self_key = AssignmentKey::self_assignment(
                key.formation_id,
                participant.clone(),
                participant_type,
            );
            let ready = ctx
                .assignments
                .find_by_key(&self_key)
                .await?
                .map(|a| a.state == AssignmentState::Ready)
                .unwrap_or(false);
            if !ready {
                return Err(dependencies_not_met(format!(
                    "self-assignment of {participant} is not READY"
                )));
            }
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Both self-assignments must be READY"
    }
}

/// Removal order between the halves of a pair and the self-assignment
pub struct UnassignOrderGuard;

#[async_trait]
impl StateGuard<FormationAssignment> for UnassignOrderGuard {
    async fn check(
        &self,
        assignment: &FormationAssignment,
        ctx: &GuardContext<'_>,
    ) -> GuardResult<()> {
        if !assignment.state.is_unassign_phase() {
            return Ok(());
        }
        let key = &assignment.key;

        if assignment.is_self() {
            let others = ctx
                .assignments
                .list_for_participant(key.formation_id, &key.source)
                .await?
                .into_iter()
                .filter(|a| !a.is_self())
                .count();
            if others > 0 {
                return Err(dependencies_not_met(format!(
                    "{others} assignments still reference {}",
                    key.source
                )));
            }
            return Ok(());
        }

        let source_leaving = ctx.is_unassigning(&key.source);
        let target_leaving = ctx.is_unassigning(&key.target);
        let waits_for_reverse = match (source_leaving, target_leaving) {
            (false, true) => true,
            (true, true) => key.source > key.target,
            _ => false,
        };

        if waits_for_reverse && ctx.assignments.find_by_key(&key.reverse()).await?.is_some() {
            return Err(dependencies_not_met(format!(
                "reverse assignment {} -> {} must be removed first",
                key.target, key.source
            )));
        }

        Ok(())
    }

    fn description(&self) -> &'static str {
        "Pairs are removed in order before self-assignments"
    }
}

/// The guards every assignment passes before it is notified, in evaluation order
pub fn dispatch_guards() -> Vec<Box<dyn StateGuard<FormationAssignment>>> {
    vec![
        Box::new(FormationAcceptsNotificationsGuard),
        Box::new(SelfAssignmentsReadyGuard),
        Box::new(UnassignOrderGuard),
    ]
}
