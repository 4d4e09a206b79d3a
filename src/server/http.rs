//! Stateless HTTP helpers backed by the same host actor.

use super::AppState;
use crate::error::{ErrorCode, ProtocolError};
use crate::host::HostCommand;
use crate::store::CompleteOutcome;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        let status = match self.code {
            ErrorCode::TargetNotFound | ErrorCode::InvalidTaskReference => StatusCode::NOT_FOUND,
            ErrorCode::TargetAtCapacity
            | ErrorCode::CapacityExceeded
            | ErrorCode::StaleTaskRejected => StatusCode::CONFLICT,
            ErrorCode::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self }))).into_response()
    }
}

fn internal(err: anyhow::Error) -> ProtocolError {
    ProtocolError::internal(err)
}

pub async fn healthz(State(app): State<AppState>) -> Result<Response, ProtocolError> {
    let snapshot = app.host.snapshot().await.map_err(internal)?;
    let body = Json(json!({
        "ok": true,
        "pid": std::process::id(),
        "port": app.port,
        "mode": snapshot.mode.as_str(),
        "uptimeMs": app.started.elapsed().as_millis() as u64,
    }));
    Ok(([("x-syndicate", "1")], body).into_response())
}

pub async fn discovery(State(app): State<AppState>) -> Result<Response, ProtocolError> {
    let snapshot = app.host.snapshot().await.map_err(internal)?;
    let urls: Vec<String> = app
        .network_ip
        .iter()
        .map(|ip| format!("http://{}:{}", ip, app.port))
        .chain(std::iter::once(format!("http://localhost:{}", app.port)))
        .collect();
    Ok(Json(json!({
        "urls": urls,
        "mode": snapshot.mode.as_str(),
        "activeNodes": snapshot.nodes.len(),
        "nodes": snapshot.squad(),
    }))
    .into_response())
}

pub async fn state_snapshot(State(app): State<AppState>) -> Result<Response, ProtocolError> {
    let snapshot = app.host.snapshot().await.map_err(internal)?;
    Ok(Json(snapshot).into_response())
}

pub async fn list_tasks(State(app): State<AppState>) -> Result<Response, ProtocolError> {
    let snapshot = app.host.snapshot().await.map_err(internal)?;
    let tasks: Vec<_> = snapshot
        .tasks
        .into_iter()
        .filter(|t| t.deleted_at.is_none())
        .collect();
    Ok(Json(tasks).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskBody {
    pub text: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub syndicate: bool,
}

pub async fn create_task(
    State(app): State<AppState>,
    Json(body): Json<CreateTaskBody>,
) -> Result<Response, ProtocolError> {
    let owner_label = body.owner.clone().unwrap_or_else(|| "local".to_string());
    let created = app
        .host
        .create_task(body.text, body.owner, body.handler, body.syndicate)
        .await
        .map_err(internal)?;
    match created {
        Some(task) => Ok((StatusCode::CREATED, Json(task)).into_response()),
        None => Err(ProtocolError::capacity_exceeded(&owner_label, app.max_tasks)),
    }
}

pub async fn complete_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ProtocolError> {
    match app.host.complete_task(id.clone()).await.map_err(internal)? {
        CompleteOutcome::Completed(task) => Ok(Json(task).into_response()),
        CompleteOutcome::VerificationRequired(task) => {
            Ok((StatusCode::ACCEPTED, Json(task)).into_response())
        }
        CompleteOutcome::NotFound => Err(ProtocolError::invalid_task(&id)),
    }
}

pub async fn delete_task(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ProtocolError> {
    match app.host.delete_task(id.clone()).await.map_err(internal)? {
        Some(task) => Ok(Json(task).into_response()),
        None => Err(ProtocolError::invalid_task(&id)),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ShutdownBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn shutdown(
    State(app): State<AppState>,
    body: Option<Json<ShutdownBody>>,
) -> Result<Response, ProtocolError> {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "shutdown requested".to_string());
    app.host
        .send(HostCommand::Shutdown { reason })
        .await
        .map_err(internal)?;
    Ok(Json(json!({ "ok": true })).into_response())
}
