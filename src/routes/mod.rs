// REST facade over the context's exposed interfaces

mod http;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::cors::{Any, CorsLayer};

use crate::context::AppContext;
use crate::error::FleetError;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) ctx: Arc<AppContext>,
}

pub fn app(ctx: Arc<AppContext>) -> Router {
    let state = AppState { ctx };
    Router::new()
        .route("/", get(|| async { "fleetdeck" })) // GET /
        .route("/version", get(http::version_handler))
        .route("/api/devices", get(http::list_devices).post(http::add_device))
        .route(
            "/api/devices/{id}",
            put(http::update_device).delete(http::remove_device),
        )
        .route("/api/devices/{id}/status", get(http::device_status))
        .route("/api/devices/{id}/refresh", post(http::refresh_device))
        .route("/api/devices/{id}/wake", post(http::wake_device))
        .route("/api/devices/{id}/shutdown", post(http::shutdown_device))
        .route("/api/devices/{id}/reboot", post(http::reboot_device))
        .route(
            "/api/devices/{id}/containers/{name}/{op}",
            post(http::container_action),
        )
        .route("/api/status", get(http::all_statuses))
        .route("/api/jobs", get(http::list_jobs).post(http::add_job))
        .route(
            "/api/jobs/{id}",
            put(http::update_job).delete(http::remove_job),
        )
        .route("/api/jobs/{id}/toggle", post(http::toggle_job))
        .route("/api/jobs/{id}/run", post(http::run_job))
        .route("/api/jobs/{id}/history", get(http::job_history))
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}

/// Maps the domain taxonomy onto HTTP statuses; the body carries the message.
pub(crate) struct ApiError(FleetError);

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            FleetError::ConfigError(_) => StatusCode::BAD_REQUEST,
            FleetError::UnknownDevice(_) | FleetError::UnknownJob(_) => StatusCode::NOT_FOUND,
            FleetError::Unreachable(_) | FleetError::ActionError(_) => StatusCode::BAD_GATEWAY,
            FleetError::AuthFailure(_) => StatusCode::BAD_GATEWAY,
            FleetError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FleetError::SkippedGuard(_) => StatusCode::CONFLICT,
        };
        let body = axum::Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}
