//! # Web API Module
//!
//! Axum-based HTTP surface of the formation engine: management events, receiver status
//! callbacks, operator resynchronization and registry maintenance.
//!
//! ## Core Components
//!
//! - [`routes`] - HTTP route definitions and organization
//! - [`handlers`] - Request handlers for each endpoint group
//! - [`middleware`] - Request ids and credential checks
//! - [`state`] - Shared application state
//! - [`errors`] - Mapping of engine errors onto HTTP responses

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod state;

use axum::Router;

pub use errors::{ApiError, ApiResult};
pub use state::AppState;

/// Create the main Axum application with all routes and middleware
///
/// Health is public; everything under `/v1` goes through the auth middleware.
pub fn create_app(app_state: AppState) -> Router {
    let request_timeout = app_state.config.request_timeout();

    let public_routes = Router::new().merge(routes::health_routes());

    let protected_routes = Router::new()
        .nest("/v1", routes::api_v1_routes())
        .layer(axum::middleware::from_fn_with_state(
            app_state.clone(),
            middleware::auth::conditional_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(axum::middleware::from_fn(
            middleware::request_id::add_request_id,
        ))
        .layer(tower_http::timeout::TimeoutLayer::new(request_timeout))
        .layer(middleware::cors_layer(&app_state.config.cors_allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}
