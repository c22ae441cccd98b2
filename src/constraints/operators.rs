//! Operator inputs and their pure transformations.
//!
//! Each operator receives its typed input (rendered from the constraint's input template)
//! and the facts pre-loaded for the join point. None of them perform I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::facts::ConstraintFacts;
use crate::models::{normalize_configuration, Destination, StatusReport};
use crate::state_machine::states::AssignmentState;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ContainsScenarioGroupsInput {
    pub required_groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct IsNotAssignedToAnyFormationOfTypeInput {
    pub formation_template_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DoesNotContainResourceOfSubtypeInput {
    pub resource_subtype: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct DoNotGenerateNotificationInput {
    #[serde(default)]
    pub except_subtypes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConfigMutatorInput {
    #[serde(default)]
    pub only_for_source_subtypes: Vec<String>,
    #[serde(default)]
    pub only_for_target_subtypes: Vec<String>,
    /// Matched against the assignment's state before the report is applied
    #[serde(default)]
    pub only_for_states: Vec<AssignmentState>,
    #[serde(default)]
    pub state: Option<AssignmentState>,
    #[serde(default)]
    pub configuration: Option<Value>,
    #[serde(default)]
    pub merge_configuration: bool,
    #[serde(default = "default_skip_on_error")]
    pub skip_on_error: bool,
}

fn default_skip_on_error() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RedirectNotificationInput {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub only_for_tenants: Vec<String>,
}

/// Behaviors of the asynchronous flow control operator
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "behavior", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowControlBehavior {
    DeferUntilReverseReady,
    FanOut {
        destinations: Vec<Destination>,
    },
    SecondaryConfirmation {
        url: String,
        #[serde(default)]
        method: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOperator {
    ContainsScenarioGroups(ContainsScenarioGroupsInput),
    IsNotAssignedToAnyFormationOfType(IsNotAssignedToAnyFormationOfTypeInput),
    DoesNotContainResourceOfSubtype(DoesNotContainResourceOfSubtypeInput),
    DoNotGenerateFormationAssignmentNotification(DoNotGenerateNotificationInput),
    DoNotGenerateFormationAssignmentNotificationForLoops,
}

/// An instantiated operator, ready to run
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintOperator {
    Gate(GateOperator),
    Mutator(ConfigMutatorInput),
    Redirect(RedirectNotificationInput),
    FlowControl(FlowControlBehavior),
}

impl ConstraintOperator {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Gate(_) => "gate",
            Self::Mutator(_) => "mutator",
            Self::Redirect(_) => "redirect",
            Self::FlowControl(_) => "flow_control",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    Pass,
    Fail(String),
}

impl GateVerdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl GateOperator {
    pub fn evaluate(&self, facts: &ConstraintFacts) -> GateVerdict {
        match self {
            Self::ContainsScenarioGroups(input) => contains_scenario_groups(input, facts),
            Self::IsNotAssignedToAnyFormationOfType(input) => {
                is_not_assigned_to_formation_of_type(input, facts)
            }
            Self::DoesNotContainResourceOfSubtype(input) => {
                does_not_contain_resource_of_subtype(input, facts)
            }
            Self::DoNotGenerateFormationAssignmentNotification(input) => {
                let source_subtype = facts
                    .source
                    .as_ref()
                    .and_then(|s| s.subtype.as_deref());
                match source_subtype {
                    Some(subtype) if input.except_subtypes.iter().any(|e| e == subtype) => {
                        GateVerdict::Pass
                    }
                    _ => GateVerdict::Fail(format!(
                        "notifications are disabled for source subtype '{}'",
                        source_subtype.unwrap_or("")
                    )),
                }
            }
            Self::DoNotGenerateFormationAssignmentNotificationForLoops => {
                match facts.assignment.as_ref() {
                    Some(assignment) if assignment.is_self() => {
                        GateVerdict::Fail("self-assignment notifications are disabled".to_string())
                    }
                    _ => GateVerdict::Pass,
                }
            }
        }
    }
}

fn contains_scenario_groups(
    input: &ContainsScenarioGroupsInput,
    facts: &ConstraintFacts,
) -> GateVerdict {
    let Some(participant) = facts.participant.as_ref() else {
        return GateVerdict::Pass;
    };
    let groups = participant.scenario_groups();
    let missing: Vec<&str> = input
        .required_groups
        .iter()
        .filter(|required| !groups.contains(required))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        GateVerdict::Pass
    } else {
        GateVerdict::Fail(format!(
            "participant '{}' is missing scenario groups: {}",
            participant.id,
            missing.join(", ")
        ))
    }
}

fn is_not_assigned_to_formation_of_type(
    input: &IsNotAssignedToAnyFormationOfTypeInput,
    facts: &ConstraintFacts,
) -> GateVerdict {
    let conflicting = facts.participant_formations.iter().find(|formation| {
        formation.template_id == input.formation_template_id
            && Some(formation.id) != facts.formation_id
    });

    match conflicting {
        Some(formation) => GateVerdict::Fail(format!(
            "participant is already assigned to formation '{}' of template '{}'",
            formation.name, formation.template_id
        )),
        None => GateVerdict::Pass,
    }
}

fn does_not_contain_resource_of_subtype(
    input: &DoesNotContainResourceOfSubtypeInput,
    facts: &ConstraintFacts,
) -> GateVerdict {
    let participant_id = facts.participant.as_ref().map(|p| p.id.as_str());
    let existing = facts.formation_members.iter().find(|member| {
        Some(member.id.as_str()) != participant_id
            && member.subtype.as_deref() == Some(input.resource_subtype.as_str())
    });

    match existing {
        Some(member) => GateVerdict::Fail(format!(
            "formation already contains '{}' of subtype '{}'",
            member.id, input.resource_subtype
        )),
        None => GateVerdict::Pass,
    }
}

/// Deep-merge `patch` into `base`; objects merge key by key, anything else replaces
pub fn deep_merge(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (key, value) in patch {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}

fn matches_filter(filter: &[String], value: Option<&str>) -> bool {
    filter.is_empty() || value.is_some_and(|v| filter.iter().any(|f| f == v))
}

/// Rewrite a status report; returns the report unchanged when a condition does not hold
pub fn apply_config_mutator(
    input: &ConfigMutatorInput,
    mut report: StatusReport,
    facts: &ConstraintFacts,
) -> StatusReport {
    if input.skip_on_error && report.is_error() {
        return report;
    }

    let source_subtype = facts.source.as_ref().and_then(|p| p.subtype.as_deref());
    let target_subtype = facts.target.as_ref().and_then(|p| p.subtype.as_deref());
    if !matches_filter(&input.only_for_source_subtypes, source_subtype)
        || !matches_filter(&input.only_for_target_subtypes, target_subtype)
    {
        return report;
    }
    let current_state = facts.assignment.as_ref().map(|a| a.state);
    if !input.only_for_states.is_empty()
        && !current_state.is_some_and(|state| input.only_for_states.contains(&state))
    {
        return report;
    }

    if let Some(state) = input.state {
        report.state = state;
        if !state.is_error() {
            report.error = None;
        }
    }

    if let Some(configuration) = input.configuration.clone() {
        let replacement = if input.merge_configuration {
            let stored = facts
                .assignment
                .as_ref()
                .and_then(|a| a.value.clone())
                .unwrap_or_else(|| Value::Object(Map::new()));
            deep_merge(stored, configuration)
        } else {
            configuration
        };
        report.configuration = normalize_configuration(Some(replacement));
    }

    report
}

/// Destination after a redirect, or `None` when the receiving tenant is not targeted
pub fn apply_redirect(
    input: &RedirectNotificationInput,
    current: &Destination,
    receiver_tenant: &str,
) -> Option<Destination> {
    if !input.only_for_tenants.is_empty()
        && !input.only_for_tenants.iter().any(|t| t == receiver_tenant)
    {
        return None;
    }
    Some(Destination::new(
        input.method.clone().unwrap_or_else(|| current.method.clone()),
        input.url.clone(),
    ))
}

/// Whether delivery should wait for the reverse assignment
pub fn should_defer(facts: &ConstraintFacts) -> bool {
    match facts.reverse.as_ref() {
        Some(reverse) => {
            matches!(
                reverse.state,
                AssignmentState::Initial | AssignmentState::ConfigPending
            ) && !reverse.deferred
        }
        None => false,
    }
}

/// Intermediate state a success report becomes while secondary confirmation is pending
pub fn secondary_confirmation_state(
    report: &StatusReport,
    unassign: bool,
) -> Option<AssignmentState> {
    match (report.state, unassign) {
        (AssignmentState::Ready | AssignmentState::CreateReady, false) => {
            Some(AssignmentState::CreateReady)
        }
        (AssignmentState::Ready | AssignmentState::DeleteReady, true) => {
            Some(AssignmentState::DeleteReady)
        }
        _ => None,
    }
}
