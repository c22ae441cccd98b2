//! # Formation Handlers
//!
//! Formation reads, the aggregated status view, lifecycle callbacks and operator
//! resynchronization.

use axum::extract::{Path, State};
use axum::Json;
use tracing::info;
use uuid::Uuid;

use crate::models::{Formation, FormationStatusReportRequest};
use crate::orchestration::{FormationReportOutcome, FormationStatusView, ResyncReport};
use crate::web::errors::ApiResult;
use crate::web::state::AppState;

/// Get a formation: GET /v1/formations/{formation_id}
pub async fn get_formation(
    State(state): State<AppState>,
    Path(formation_id): Path<Uuid>,
) -> ApiResult<Json<Formation>> {
    Ok(Json(state.engine.get_formation(formation_id).await?))
}

/// Aggregated condition and assignments: GET /v1/formations/{formation_id}/status
pub async fn get_formation_status(
    State(state): State<AppState>,
    Path(formation_id): Path<Uuid>,
) -> ApiResult<Json<FormationStatusView>> {
    Ok(Json(state.engine.formation_status(formation_id).await?))
}

/// Lifecycle callback from the formation template's receiver:
/// PATCH /v1/formations/{formation_id}/status
pub async fn report_formation_status(
    State(state): State<AppState>,
    Path(formation_id): Path<Uuid>,
    Json(request): Json<FormationStatusReportRequest>,
) -> ApiResult<Json<FormationReportOutcome>> {
    info!(formation_id = %formation_id, state = %request.state, "Formation status report received");
    Ok(Json(
        state
            .engine
            .report_formation_status(formation_id, request)
            .await?,
    ))
}

/// Re-drive every non-READY assignment: POST /v1/formations/{formation_id}/resynchronize
pub async fn resynchronize_formation(
    State(state): State<AppState>,
    Path(formation_id): Path<Uuid>,
) -> ApiResult<Json<ResyncReport>> {
    info!(formation_id = %formation_id, "Resynchronization requested via web API");
    Ok(Json(state.engine.resynchronize(formation_id).await?))
}
