//! # Authentication Middleware
//!
//! Protected routes accept either a configured API key in the API key header or a
//! callback token as `Authorization: Bearer <token>`. Nothing is checked while auth is
//! disabled.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use crate::config::WebAuthConfig;
use crate::web::errors::ApiError;
use crate::web::state::AppState;

/// Which credential authenticated a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    /// Auth is disabled
    Anonymous,
    ApiKey,
    CallbackToken,
}

/// Reject requests without a valid credential when auth is enabled
pub async fn conditional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credential = authenticate(&state.config.auth, request.headers())?;
    debug!(credential = ?credential, path = %request.uri().path(), "Request authenticated");
    request.extensions_mut().insert(credential);
    Ok(next.run(request).await)
}

/// Check the request headers against the configured credentials
pub fn authenticate(config: &WebAuthConfig, headers: &HeaderMap) -> Result<Credential, ApiError> {
    if !config.enabled {
        return Ok(Credential::Anonymous);
    }

    let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());

    if let Some(key) = header(config.api_key_header.as_str()) {
        if config.api_keys.iter().any(|candidate| candidate == key) {
            return Ok(Credential::ApiKey);
        }
        warn!("API key authentication failed");
        return Err(ApiError::Unauthorized);
    }

    if let Some(token) = header("authorization").and_then(|h| h.strip_prefix("Bearer ")) {
        if config.callback_tokens.iter().any(|candidate| candidate == token) {
            return Ok(Credential::CallbackToken);
        }
        warn!("Bearer token authentication failed");
        return Err(ApiError::Unauthorized);
    }

    Err(ApiError::Unauthorized)
}
