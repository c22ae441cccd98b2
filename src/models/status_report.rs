use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::formation_assignment::{normalize_configuration, OperationKind};
use crate::state_machine::states::{AssignmentState, FormationState};

/// Simplified error state receivers may report; translated by operation kind
pub const SIMPLIFIED_ERROR_STATE: &str = "ERROR";

/// Wire shape of an assignment status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReportRequest {
    pub state: String,
    #[serde(default)]
    pub configuration: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    /// Correlates the report with the operation that issued the request
    #[serde(default)]
    pub operation_id: Option<u64>,
}

/// A validated status report, either delivered by callback or derived from a sync response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub state: AssignmentState,
    pub configuration: Option<Value>,
    pub error: Option<String>,
    pub operation_id: Option<u64>,
}

impl StatusReport {
    pub fn new(state: AssignmentState) -> Self {
        Self {
            state,
            configuration: None,
            error: None,
            operation_id: None,
        }
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = normalize_configuration(Some(configuration));
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        let error = error.into();
        self.error = (!error.is_empty()).then_some(error);
        self
    }

    pub fn is_error(&self) -> bool {
        self.state.is_error()
    }
}

impl StatusReportRequest {
    /// Validate the wire report against the operation it answers
    pub fn into_report(self, kind: OperationKind) -> Result<StatusReport, String> {
        let state = if self.state == SIMPLIFIED_ERROR_STATE {
            match kind {
                OperationKind::Assign => AssignmentState::CreateError,
                OperationKind::Unassign => AssignmentState::DeleteError,
            }
        } else {
            self.state.parse::<AssignmentState>()?
        };

        let configuration = normalize_configuration(self.configuration);
        let error = self.error.filter(|e| !e.trim().is_empty());

        if error.is_some() && !state.is_error() {
            return Err(format!(
                "an error can only be reported with CREATE_ERROR or DELETE_ERROR, got {state}"
            ));
        }
        if configuration.is_some() && !state.accepts_configuration() {
            return Err(format!(
                "a configuration can only be reported with READY, CONFIG_PENDING, CREATE_READY or DELETE_READY, got {state}"
            ));
        }

        let supported = match kind {
            OperationKind::Assign => state.is_reportable_on_assign(),
            OperationKind::Unassign => state.is_reportable_on_unassign(),
        };
        if !supported {
            return Err(format!("state {state} is not supported for {kind} operations"));
        }

        Ok(StatusReport {
            state,
            configuration,
            error,
            operation_id: self.operation_id,
        })
    }
}

/// Wire shape of a formation lifecycle status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationStatusReportRequest {
    pub state: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormationStatusReport {
    pub state: FormationState,
    pub error: Option<String>,
}

impl FormationStatusReportRequest {
    /// Validate against the formation's current lifecycle phase
    pub fn into_report(self, current: FormationState) -> Result<FormationStatusReport, String> {
        let deleting = matches!(current, FormationState::Deleting | FormationState::DeleteError);
        let state = if self.state == SIMPLIFIED_ERROR_STATE {
            if deleting {
                FormationState::DeleteError
            } else {
                FormationState::CreateError
            }
        } else {
            self.state.parse::<FormationState>()?
        };

        let expected = if deleting {
            matches!(state, FormationState::Ready | FormationState::DeleteError)
        } else {
            matches!(state, FormationState::Ready | FormationState::CreateError)
        };
        if !expected {
            return Err(format!(
                "state {state} is not supported while the formation is {current}"
            ));
        }

        let error = self.error.filter(|e| !e.trim().is_empty());
        if error.is_some() && !state.is_error() {
            return Err(format!(
                "an error can only be reported with CREATE_ERROR or DELETE_ERROR, got {state}"
            ));
        }

        Ok(FormationStatusReport { state, error })
    }
}
