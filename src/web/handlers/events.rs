//! # Management Event Handler

use axum::extract::State;
use axum::Json;
use tracing::info;

use crate::models::ManagementEvent;
use crate::orchestration::ManagementOutcome;
use crate::web::errors::ApiResult;
use crate::web::state::AppState;

/// Apply a management event: POST /v1/events
pub async fn handle_management_event(
    State(state): State<AppState>,
    Json(event): Json<ManagementEvent>,
) -> ApiResult<Json<ManagementOutcome>> {
    info!(
        event_type = event.event_type(),
        tenant = %event.tenant(),
        "Received management event via web API"
    );

    let outcome = state.engine.handle_event(event).await?;
    Ok(Json(outcome))
}
