// Handlers: devices, status, privileged actions, jobs

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use super::{ApiError, AppState};
use crate::audit::AuditAction;
use crate::error::FleetError;
use crate::models::{ContainerOp, Device, Job};
use crate::version::{NAME, VERSION};

const ACTOR: &str = "api";

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    Json(json!({
        "name": NAME,
        "version": VERSION,
    }))
}

// Devices

pub(super) async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.registry.list_devices())
}

pub(super) async fn add_device(
    State(state): State<AppState>,
    Json(device): Json<Device>,
) -> Result<impl IntoResponse, ApiError> {
    let id = device.id.clone();
    let result = state.ctx.add_device(device);
    state
        .ctx
        .audit
        .record(AuditAction::DeviceAdd, &id, outcome(&result), ACTOR);
    result?;
    Ok(StatusCode::CREATED)
}

pub(super) async fn update_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(device): Json<Device>,
) -> Result<impl IntoResponse, ApiError> {
    if device.id != id {
        return Err(FleetError::ConfigError(format!(
            "body id {:?} does not match path id {id:?}",
            device.id
        ))
        .into());
    }
    let result = state.ctx.update_device(device);
    state
        .ctx
        .audit
        .record(AuditAction::DeviceUpdate, &id, outcome(&result), ACTOR);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn remove_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.ctx.remove_device(&id);
    state
        .ctx
        .audit
        .record(AuditAction::DeviceRemove, &id, outcome(&result), ACTOR);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

// Status

pub(super) async fn device_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.ctx.get_snapshot(&id)?))
}

pub(super) async fn refresh_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.ctx.refresh_device_status(&id).await?))
}

pub(super) async fn all_statuses(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.all_snapshots())
}

// Privileged device actions

pub(super) async fn wake_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.ctx.wake_device(&id);
    state
        .ctx
        .audit
        .record(AuditAction::DeviceWake, &id, outcome(&result), ACTOR);
    result?;
    Ok(Json(json!({ "success": true })))
}

pub(super) async fn shutdown_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.ctx.shutdown_device(&id).await;
    state
        .ctx
        .audit
        .record(AuditAction::DeviceShutdown, &id, outcome(&result), ACTOR);
    result?;
    Ok(Json(json!({ "success": true })))
}

pub(super) async fn reboot_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.ctx.reboot_device(&id).await;
    state
        .ctx
        .audit
        .record(AuditAction::DeviceReboot, &id, outcome(&result), ACTOR);
    result?;
    Ok(Json(json!({ "success": true })))
}

pub(super) async fn container_action(
    State(state): State<AppState>,
    Path((id, name, op)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let op = match op.as_str() {
        "start" => ContainerOp::Start,
        "stop" => ContainerOp::Stop,
        "restart" => ContainerOp::Restart,
        other => {
            return Err(
                FleetError::ConfigError(format!("unknown container op {other:?}")).into(),
            );
        }
    };
    let result = state.ctx.container_action(&id, &name, op).await;
    let target = format!("{id}/{name}");
    state
        .ctx
        .audit
        .record(AuditAction::ContainerAction, &target, outcome(&result), ACTOR);
    result?;
    Ok(Json(json!({ "success": true })))
}

// Jobs

pub(super) async fn list_jobs(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ctx.job_statuses())
}

pub(super) async fn add_job(
    State(state): State<AppState>,
    Json(job): Json<Job>,
) -> Result<impl IntoResponse, ApiError> {
    let id = job.id.clone();
    let result = state.ctx.add_job(job);
    state
        .ctx
        .audit
        .record(AuditAction::JobAdd, &id, outcome(&result), ACTOR);
    result?;
    Ok(StatusCode::CREATED)
}

pub(super) async fn update_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(job): Json<Job>,
) -> Result<impl IntoResponse, ApiError> {
    if job.id != id {
        return Err(FleetError::ConfigError(format!(
            "body id {:?} does not match path id {id:?}",
            job.id
        ))
        .into());
    }
    let result = state.ctx.update_job(job);
    state
        .ctx
        .audit
        .record(AuditAction::JobUpdate, &id, outcome(&result), ACTOR);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn remove_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.ctx.remove_job(&id);
    state
        .ctx
        .audit
        .record(AuditAction::JobRemove, &id, outcome(&result), ACTOR);
    result?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn toggle_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.ctx.toggle_job(&id);
    state
        .ctx
        .audit
        .record(AuditAction::JobToggle, &id, outcome(&result), ACTOR);
    let enabled = result?;
    Ok(Json(json!({ "enabled": enabled })))
}

pub(super) async fn run_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.ctx.run_job_now(&id).await;
    state
        .ctx
        .audit
        .record(AuditAction::JobRun, &id, outcome(&result), ACTOR);
    Ok(Json(result?))
}

pub(super) async fn job_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.ctx.list_run_history(&id)?))
}

fn outcome<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}
