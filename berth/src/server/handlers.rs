//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

use crate::deploy::{classify, EnvMutability, EnvPolicyInput};
use crate::errors::DeployError;
use crate::models::activity::{Activity, ActivityKind};
use crate::models::deployment::{DeployProgress, DeployRequest, Deployment};
use crate::models::project::Project;
use crate::runtime::{ProcessInfo, RuntimeLifecycle};
use crate::server::state::ServerState;
use crate::telemetry::{collect_metrics, HostTelemetry};
use crate::utils::version_info;

/// Error payload returned by every failing handler
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Maps a `DeployError` onto an HTTP response
#[derive(Debug)]
pub struct ApiError(pub DeployError);

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            debug!("Request rejected: {}", self.0);
        }
        let body = ErrorBody {
            code: self.0.kind().to_string(),
            message: self.0.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "berth".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Host metrics plus project counts
pub async fn telemetry_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<Json<HostTelemetry>> {
    let system = tokio::task::spawn_blocking(collect_metrics)
        .await
        .map_err(|e| DeployError::Internal(e.to_string()))?;

    let projects = state.projects.get_all().await?.len();
    // a supervisor outage should not hide host metrics
    let online = match state.runtime.get_processes().await {
        Ok(rows) => rows.iter().filter(|p| p.status.is_running()).count(),
        Err(e) => {
            warn!("Unable to list processes for telemetry: {}", e);
            0
        }
    };

    Ok(Json(HostTelemetry {
        system,
        version: version_info().version,
        projects,
        online,
    }))
}

/// Every registered project with its runtime status
pub async fn processes_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<Json<Vec<ProcessInfo>>> {
    Ok(Json(state.runtime.get_processes().await?))
}

pub async fn projects_handler(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<Json<Vec<Project>>> {
    Ok(Json(state.projects.get_all().await?))
}

/// Deployment history of one project, newest first
pub async fn project_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Deployment>>> {
    let project = state.project(&id).await?;
    let mut deployments = state.deployments.list_by_project(&project.id).await?;
    deployments.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(Json(deployments))
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

pub async fn activity_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ActivityQuery>,
) -> ApiResult<Json<Vec<Activity>>> {
    let limit = query.limit.unwrap_or(50).min(500);
    Ok(Json(state.activity_repo.recent(limit).await?))
}

/// Deploy an already-uploaded archive and wait for the outcome
pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let project = state.orchestrator.deploy(request).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// Lifecycle action requested through the API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
    RestartWithEnv,
}

impl LifecycleAction {
    fn activity(&self) -> (ActivityKind, &'static str) {
        match self {
            LifecycleAction::Start => (ActivityKind::Start, "Started"),
            LifecycleAction::Stop => (ActivityKind::Stop, "Stopped"),
            LifecycleAction::Restart => (ActivityKind::Restart, "Restarted"),
            LifecycleAction::RestartWithEnv => {
                (ActivityKind::Restart, "Restarted with refreshed environment")
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub project_id: String,
    pub status: String,
}

async fn run_lifecycle(
    state: &ServerState,
    id: &str,
    action: LifecycleAction,
) -> ApiResult<Json<LifecycleResponse>> {
    let project = state.project(id).await?;

    if action == LifecycleAction::RestartWithEnv {
        let policy = classify(EnvPolicyInput::from(&project));
        if let EnvMutability::Immutable { message, .. } = policy {
            return Err(DeployError::Validation(message).into());
        }
    }

    match action {
        LifecycleAction::Start => state.runtime.start(&project).await?,
        LifecycleAction::Stop => state.runtime.stop(&project).await?,
        LifecycleAction::Restart => state.runtime.restart(&project).await?,
        LifecycleAction::RestartWithEnv => state.runtime.restart_with_env(&project).await?,
    }

    let (kind, verb) = action.activity();
    state
        .activity
        .log(kind, &project.name, &format!("{} {}", verb, project.name), None)
        .await;

    let status = state.runtime.status(&project).await?;
    Ok(Json(LifecycleResponse {
        project_id: project.id,
        status: status.as_str().to_string(),
    }))
}

pub async fn start_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    run_lifecycle(&state, &id, LifecycleAction::Start).await
}

pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    run_lifecycle(&state, &id, LifecycleAction::Stop).await
}

pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    run_lifecycle(&state, &id, LifecycleAction::Restart).await
}

pub async fn restart_env_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LifecycleResponse>> {
    run_lifecycle(&state, &id, LifecycleAction::RestartWithEnv).await
}

pub async fn delete_project_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    Ok(Json(state.orchestrator.delete_project(&id).await?))
}

/// Whether the project's env vars can change without a redeploy
pub async fn env_policy_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<EnvMutability>> {
    let project = state.project(&id).await?;
    Ok(Json(classify(EnvPolicyInput::from(&project))))
}

// ================================ WEBSOCKETS ===================================== //

/// Interactive deploy: the first text frame is the request, progress follows
pub async fn deploy_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_deployment(socket, state))
}

async fn next_request(socket: &mut WebSocket) -> Option<Result<DeployRequest, DeployError>> {
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                return Some(
                    serde_json::from_str(text.as_str())
                        .map_err(|e| DeployError::Validation(format!("Invalid request: {}", e))),
                )
            }
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

async fn send_frame(socket: &mut WebSocket, frame: &DeployProgress) -> bool {
    match serde_json::to_string(frame) {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize progress frame: {}", e);
            true
        }
    }
}

async fn stream_deployment(mut socket: WebSocket, state: Arc<ServerState>) {
    let request = match next_request(&mut socket).await {
        Some(Ok(request)) => request,
        Some(Err(e)) => {
            let frame = DeployProgress::Failed {
                code: e.kind().to_string(),
                message: e.user_message(),
            };
            send_frame(&mut socket, &frame).await;
            return;
        }
        None => return,
    };

    let (tx, mut rx) = mpsc::channel(32);
    let orchestrator = state.orchestrator.clone();
    // the pipeline outlives a disconnected client
    tokio::spawn(async move {
        let _ = orchestrator.deploy_streaming(request, tx).await;
    });

    while let Some(frame) = rx.recv().await {
        if !send_frame(&mut socket, &frame).await {
            debug!("Deploy client went away");
            return;
        }
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Push every bus event to the client as JSON
pub async fn events_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let rx = state.bus.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(
    socket: WebSocket,
    mut rx: broadcast::Receiver<crate::events::ControlEvent>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(event) => {
                    let Ok(text) = serde_json::to_string(&event) else { continue };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event subscriber lagged, {} events dropped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => {}
            },
        }
    }
}
