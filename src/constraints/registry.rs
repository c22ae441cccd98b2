//! Closed operator registry: which join points an operator may attach to and how its
//! rendered input becomes a typed operator.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::operators::{ConstraintOperator, DoNotGenerateNotificationInput, GateOperator};
use super::{ConstraintError, ConstraintResult};
use crate::models::{JoinPoint, NewConstraint, OperatorName};

const OPERATORS: [OperatorName; 8] = [
    OperatorName::ContainsScenarioGroups,
    OperatorName::IsNotAssignedToAnyFormationOfType,
    OperatorName::DoesNotContainResourceOfSubtype,
    OperatorName::DoNotGenerateFormationAssignmentNotification,
    OperatorName::DoNotGenerateFormationAssignmentNotificationForLoops,
    OperatorName::ConfigMutator,
    OperatorName::RedirectNotification,
    OperatorName::AsynchronousFlowControl,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorRegistry;

impl OperatorRegistry {
    pub fn new() -> Self {
        Self
    }

    pub fn operators(&self) -> &'static [OperatorName] {
        &OPERATORS
    }

    pub fn permitted_join_points(&self, operator: OperatorName) -> &'static [JoinPoint] {
        match operator {
            OperatorName::ContainsScenarioGroups
            | OperatorName::IsNotAssignedToAnyFormationOfType
            | OperatorName::DoesNotContainResourceOfSubtype => &[JoinPoint::AssignFormation],
            OperatorName::DoNotGenerateFormationAssignmentNotification
            | OperatorName::DoNotGenerateFormationAssignmentNotificationForLoops => {
                &[JoinPoint::GenerateFormationAssignmentNotification]
            }
            OperatorName::ConfigMutator => &[JoinPoint::NotificationStatusReturned],
            OperatorName::RedirectNotification => &[JoinPoint::SendNotification],
            OperatorName::AsynchronousFlowControl => &[
                JoinPoint::SendNotification,
                JoinPoint::NotificationStatusReturned,
            ],
        }
    }

    pub fn supports(&self, operator: OperatorName, join_point: JoinPoint) -> bool {
        self.permitted_join_points(operator).contains(&join_point)
    }

    /// Reject attachments at join points the operator cannot run at
    pub fn validate(&self, constraint: &NewConstraint) -> ConstraintResult<()> {
        if self.supports(constraint.operator, constraint.join_point) {
            Ok(())
        } else {
            Err(ConstraintError::UnsupportedJoinPoint {
                operator: constraint.operator,
                join_point: constraint.join_point,
            })
        }
    }

    /// Turn a rendered input into the operator it configures
    pub fn instantiate(
        &self,
        operator: OperatorName,
        input: Value,
    ) -> ConstraintResult<ConstraintOperator> {
        let instantiated = match operator {
            OperatorName::ContainsScenarioGroups => ConstraintOperator::Gate(
                GateOperator::ContainsScenarioGroups(parse(operator, input)?),
            ),
            OperatorName::IsNotAssignedToAnyFormationOfType => ConstraintOperator::Gate(
                GateOperator::IsNotAssignedToAnyFormationOfType(parse(operator, input)?),
            ),
            OperatorName::DoesNotContainResourceOfSubtype => ConstraintOperator::Gate(
                GateOperator::DoesNotContainResourceOfSubtype(parse(operator, input)?),
            ),
            OperatorName::DoNotGenerateFormationAssignmentNotification => {
                let input = if input.is_null() {
                    DoNotGenerateNotificationInput::default()
                } else {
                    parse(operator, input)?
                };
                ConstraintOperator::Gate(
                    GateOperator::DoNotGenerateFormationAssignmentNotification(input),
                )
            }
            OperatorName::DoNotGenerateFormationAssignmentNotificationForLoops => {
                ConstraintOperator::Gate(
                    GateOperator::DoNotGenerateFormationAssignmentNotificationForLoops,
                )
            }
            OperatorName::ConfigMutator => ConstraintOperator::Mutator(parse(operator, input)?),
            OperatorName::RedirectNotification => {
                ConstraintOperator::Redirect(parse(operator, input)?)
            }
            OperatorName::AsynchronousFlowControl => {
                ConstraintOperator::FlowControl(parse(operator, input)?)
            }
        };
        Ok(instantiated)
    }
}

fn parse<T: DeserializeOwned>(operator: OperatorName, input: Value) -> ConstraintResult<T> {
    serde_json::from_value(input).map_err(|e| ConstraintError::InvalidInput {
        operator,
        message: e.to_string(),
    })
}
