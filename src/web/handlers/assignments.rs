//! # Assignment Handlers
//!
//! Assignment reads and the status callbacks receivers use to answer asynchronous
//! notifications.

use axum::extract::{Path, State};
use axum::Json;
use tracing::info;
use uuid::Uuid;

use crate::models::{AssignmentTransition, FormationAssignment, StatusReportRequest};
use crate::orchestration::StatusReportOutcome;
use crate::web::errors::ApiResult;
use crate::web::state::AppState;

/// All assignments of a formation: GET /v1/formations/{formation_id}/assignments
pub async fn list_assignments(
    State(state): State<AppState>,
    Path(formation_id): Path<Uuid>,
) -> ApiResult<Json<Vec<FormationAssignment>>> {
    Ok(Json(state.engine.list_assignments(formation_id).await?))
}

/// GET /v1/formations/{formation_id}/assignments/{assignment_id}
pub async fn get_assignment(
    State(state): State<AppState>,
    Path((formation_id, assignment_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<FormationAssignment>> {
    Ok(Json(
        state
            .engine
            .get_assignment(formation_id, assignment_id)
            .await?,
    ))
}

/// Transition audit trail: GET /v1/formations/{formation_id}/assignments/{assignment_id}/history
pub async fn get_assignment_history(
    State(state): State<AppState>,
    Path((formation_id, assignment_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Vec<AssignmentTransition>>> {
    Ok(Json(
        state
            .engine
            .assignment_history(formation_id, assignment_id)
            .await?,
    ))
}

/// Asynchronous status report:
/// PATCH /v1/formations/{formation_id}/assignments/{assignment_id}/status
///
/// Reports that do not match the outstanding operation are answered with an
/// `ignored` outcome rather than an error.
pub async fn report_assignment_status(
    State(state): State<AppState>,
    Path((formation_id, assignment_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<StatusReportRequest>,
) -> ApiResult<Json<StatusReportOutcome>> {
    info!(
        formation_id = %formation_id,
        assignment_id = %assignment_id,
        state = %request.state,
        operation_id = ?request.operation_id,
        "Assignment status report received"
    );
    Ok(Json(
        state
            .engine
            .report_assignment_status(formation_id, assignment_id, request)
            .await?,
    ))
}

/// Receiver-driven reset of an established pair:
/// PATCH /v1/formations/{formation_id}/assignments/{assignment_id}/status/reset
pub async fn reset_assignment(
    State(state): State<AppState>,
    Path((formation_id, assignment_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<StatusReportRequest>,
) -> ApiResult<Json<FormationAssignment>> {
    info!(
        formation_id = %formation_id,
        assignment_id = %assignment_id,
        state = %request.state,
        "Assignment reset requested"
    );
    Ok(Json(
        state
            .engine
            .reset_assignment(formation_id, assignment_id, request)
            .await?,
    ))
}
