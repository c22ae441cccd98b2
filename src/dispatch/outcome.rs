//! Classification of webhook responses into status reports.
//!
//! A synchronous response is turned into the same [`StatusReport`] a receiver would
//! send through the callback API, so both paths share one state-application pipeline.

use crate::constants::messages::{
    CONFIG_PENDING_ON_UNASSIGN, DELIVERY_FAILED_PREFIX, UNEXPECTED_STATUS_PREFIX,
};
use crate::models::{normalize_configuration, ErrorCode, StatusReport};
use crate::state_machine::states::AssignmentState;
use crate::templates::{OutputRule, ResponseContext};

use super::client::{TransportError, WebhookResponse};

/// Result of one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The result is known; apply it like a status report
    Reported {
        report: StatusReport,
        error_code: ErrorCode,
    },
    /// An asynchronous receiver accepted the request and will call back
    Acknowledged { status_code: u16 },
}

impl DispatchOutcome {
    fn failure(unassign: bool, message: impl Into<String>, error_code: ErrorCode) -> Self {
        Self::Reported {
            report: StatusReport::new(failure_state(unassign)).with_error(message),
            error_code,
        }
    }

    fn success(state: AssignmentState, configuration: Option<serde_json::Value>) -> Self {
        let mut report = StatusReport::new(state);
        report.configuration = normalize_configuration(configuration);
        Self::Reported {
            report,
            error_code: ErrorCode::TechnicalError,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Reported { report, .. } if report.is_error())
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged { .. })
    }

    /// Short label for logs and events
    pub fn label(&self) -> &'static str {
        match self {
            Self::Acknowledged { .. } => "acknowledged",
            Self::Reported { report, .. } => report.state.as_str(),
        }
    }
}

pub fn failure_state(unassign: bool) -> AssignmentState {
    if unassign {
        AssignmentState::DeleteError
    } else {
        AssignmentState::CreateError
    }
}

/// Outcome of a request that never produced a response
pub fn classify_transport_error(unassign: bool, error: &TransportError) -> DispatchOutcome {
    DispatchOutcome::failure(
        unassign,
        format!("{DELIVERY_FAILED_PREFIX}: {error}"),
        ErrorCode::TechnicalError,
    )
}

/// Classify a response from a synchronous receiver
pub fn classify_sync(
    unassign: bool,
    response: &WebhookResponse,
    rule: &OutputRule,
) -> DispatchOutcome {
    let context = ResponseContext::new(
        response.status_code,
        response.headers.clone(),
        response.body.clone(),
    );
    let outcome = match rule.evaluate(&context) {
        Ok(outcome) => outcome,
        Err(err) => {
            return DispatchOutcome::failure(unassign, err.to_string(), ErrorCode::TechnicalError)
        }
    };

    if let Some(error) = outcome.error {
        return DispatchOutcome::failure(unassign, error, ErrorCode::ClientError);
    }

    let reported_state = outcome
        .state
        .as_deref()
        .and_then(|s| s.parse::<AssignmentState>().ok());

    if response.status_code == outcome.success_status_code {
        return if unassign {
            match reported_state {
                Some(AssignmentState::DeleteReady) => {
                    DispatchOutcome::success(AssignmentState::DeleteReady, None)
                }
                _ => DispatchOutcome::success(AssignmentState::Ready, None),
            }
        } else {
            let state = match reported_state {
                Some(
                    state @ (AssignmentState::Ready
                    | AssignmentState::ConfigPending
                    | AssignmentState::CreateReady),
                ) => state,
                _ => AssignmentState::Ready,
            };
            DispatchOutcome::success(state, outcome.config)
        };
    }

    if response.status_code == outcome.incomplete_status_code {
        return if unassign {
            DispatchOutcome::failure(
                unassign,
                CONFIG_PENDING_ON_UNASSIGN,
                ErrorCode::TechnicalError,
            )
        } else {
            DispatchOutcome::success(AssignmentState::ConfigPending, outcome.config)
        };
    }

    unexpected_status(unassign, response.status_code)
}

/// Classify a response from an asynchronous receiver: any 2xx is an acknowledgement
pub fn classify_async(
    unassign: bool,
    response: &WebhookResponse,
    rule: &OutputRule,
) -> DispatchOutcome {
    if response.is_success() {
        return DispatchOutcome::Acknowledged {
            status_code: response.status_code,
        };
    }

    let context = ResponseContext::new(
        response.status_code,
        response.headers.clone(),
        response.body.clone(),
    );
    match rule.evaluate(&context) {
        Ok(outcome) => match outcome.error {
            Some(error) => DispatchOutcome::failure(unassign, error, ErrorCode::ClientError),
            None => unexpected_status(unassign, response.status_code),
        },
        Err(_) => unexpected_status(unassign, response.status_code),
    }
}

fn unexpected_status(unassign: bool, status_code: u16) -> DispatchOutcome {
    DispatchOutcome::failure(
        unassign,
        format!("{UNEXPECTED_STATUS_PREFIX} {status_code}"),
        ErrorCode::TechnicalError,
    )
}
