//! # Web API Route Definitions

use axum::routing::{delete, get, patch, post, put};
use axum::Router;

use crate::web::handlers;
use crate::web::state::AppState;

/// Create API v1 routes
///
/// - Management events and formation queries
/// - Receiver status callbacks for assignments and formations
/// - Participant, formation template and constraint registry
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Management API
        .route("/events", post(handlers::events::handle_management_event))
        // Formations API
        .route(
            "/formations/:formation_id",
            get(handlers::formations::get_formation),
        )
        .route(
            "/formations/:formation_id/status",
            get(handlers::formations::get_formation_status),
        )
        .route(
            "/formations/:formation_id/status",
            patch(handlers::formations::report_formation_status),
        )
        .route(
            "/formations/:formation_id/resynchronize",
            post(handlers::formations::resynchronize_formation),
        )
        // Assignments API
        .route(
            "/formations/:formation_id/assignments",
            get(handlers::assignments::list_assignments),
        )
        .route(
            "/formations/:formation_id/assignments/:assignment_id",
            get(handlers::assignments::get_assignment),
        )
        .route(
            "/formations/:formation_id/assignments/:assignment_id/history",
            get(handlers::assignments::get_assignment_history),
        )
        .route(
            "/formations/:formation_id/assignments/:assignment_id/status",
            patch(handlers::assignments::report_assignment_status),
        )
        .route(
            "/formations/:formation_id/assignments/:assignment_id/status/reset",
            patch(handlers::assignments::reset_assignment),
        )
        // Registry API
        .route(
            "/participants/:participant_id",
            put(handlers::registry::register_participant),
        )
        .route(
            "/participants/:participant_id",
            get(handlers::registry::get_participant),
        )
        .route(
            "/formation-templates/:template_id",
            put(handlers::registry::register_template),
        )
        .route("/constraints", post(handlers::registry::attach_constraint))
        .route("/constraints", get(handlers::registry::list_constraints))
        .route(
            "/constraints/:constraint_id",
            delete(handlers::registry::detach_constraint),
        )
}

/// Create health routes
///
/// - `/health` - Basic health check
/// - `/health/live` - Liveness probe
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::basic_health))
        .route("/health/live", get(handlers::health::liveness_probe))
}
