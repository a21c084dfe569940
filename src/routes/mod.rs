//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the REST API for polls and forms, the live-results websocket, and
//! health checks under a single Axum router. Only the REST API is rate
//! limited.

pub mod extract;
pub mod forms;
pub mod health;
pub mod polls;
pub mod ws;

use axum::Router;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::rate_limit;
use crate::state::AppState;

// =============================================================================
// ERRORS
// =============================================================================

/// JSON error body shared by every REST handler:
/// `{"success": false, "message": ".."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// 500 with a generic message. The cause is logged, not returned.
    #[must_use]
    pub fn internal(err: &impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "success": false, "message": self.message });
        (self.status, Json(body)).into_response()
    }
}

// =============================================================================
// ROUTER
// =============================================================================

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow = match origin.map(HeaderValue::from_str) {
        Some(Ok(value)) => AllowOrigin::exact(value),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "invalid CORS_ORIGIN; allowing any origin");
            AllowOrigin::any()
        }
        None => AllowOrigin::any(),
    };
    CorsLayer::new().allow_origin(allow).allow_methods(Any).allow_headers(Any)
}

/// REST routes, wrapped in the per-client rate limiter.
fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/polls", get(polls::list_polls).post(polls::create_poll))
        .route("/api/polls/{id}", get(polls::get_poll))
        .route("/api/polls/{id}/vote", post(polls::cast_vote))
        .route("/api/forms", get(forms::list_forms).post(forms::create_form))
        .route("/api/forms/{id}", get(forms::get_form))
        .route("/api/forms/{id}/responses", get(forms::list_responses))
        .route("/api/forms/{id}/submit", post(forms::submit_response))
        .route_layer(middleware::from_fn_with_state(state, rate_limit::enforce))
}

/// Build the full application router.
///
/// Serve with `into_make_service_with_connect_info::<SocketAddr>()`; the rate
/// limiter and vote handler read the peer address.
pub fn app(state: AppState, cors_origin: Option<&str>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/health", get(health::health))
        .route("/api/ws", get(ws::handle_ws))
        .merge(api_routes(state.clone()))
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
