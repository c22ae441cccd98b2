//! # Registry Handlers
//!
//! Maintenance of the participant directory, formation templates and constraints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::models::{Constraint, FormationTemplate, NewConstraint, Participant};
use crate::web::errors::{ApiError, ApiResult};
use crate::web::state::AppState;

/// Register or replace a participant: PUT /v1/participants/{participant_id}
pub async fn register_participant(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
    Json(participant): Json<Participant>,
) -> ApiResult<Json<Participant>> {
    if participant.id != participant_id {
        return Err(ApiError::bad_request(format!(
            "participant id {} does not match path {participant_id}",
            participant.id
        )));
    }
    Ok(Json(state.engine.register_participant(participant).await?))
}

/// GET /v1/participants/{participant_id}
pub async fn get_participant(
    State(state): State<AppState>,
    Path(participant_id): Path<String>,
) -> ApiResult<Json<Participant>> {
    Ok(Json(state.engine.get_participant(&participant_id).await?))
}

/// Register or replace a formation template: PUT /v1/formation-templates/{template_id}
pub async fn register_template(
    State(state): State<AppState>,
    Path(template_id): Path<String>,
    Json(template): Json<FormationTemplate>,
) -> ApiResult<Json<FormationTemplate>> {
    if template.id != template_id {
        return Err(ApiError::bad_request(format!(
            "template id {} does not match path {template_id}",
            template.id
        )));
    }
    Ok(Json(state.engine.register_template(template).await?))
}

/// Attach a constraint: POST /v1/constraints
pub async fn attach_constraint(
    State(state): State<AppState>,
    Json(constraint): Json<NewConstraint>,
) -> ApiResult<(StatusCode, Json<Constraint>)> {
    let attached = state.engine.attach_constraint(constraint).await?;
    Ok((StatusCode::CREATED, Json(attached)))
}

/// GET /v1/constraints
pub async fn list_constraints(State(state): State<AppState>) -> ApiResult<Json<Vec<Constraint>>> {
    Ok(Json(state.engine.list_constraints().await?))
}

/// Detach a constraint: DELETE /v1/constraints/{constraint_id}
pub async fn detach_constraint(
    State(state): State<AppState>,
    Path(constraint_id): Path<Uuid>,
) -> ApiResult<Json<Constraint>> {
    Ok(Json(state.engine.detach_constraint(constraint_id).await?))
}
