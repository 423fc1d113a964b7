//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::DeployError;
use crate::server::handlers::{
    activity_handler, delete_project_handler, deploy_handler, deploy_ws_handler,
    env_policy_handler, events_ws_handler, health_handler, processes_handler,
    project_deployments_handler, projects_handler, restart_env_handler, restart_handler,
    start_handler, stop_handler, telemetry_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the API router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/api/health", get(health_handler))
        .route("/api/version", get(version_handler))
        // Host
        .route("/api/telemetry", get(telemetry_handler))
        .route("/api/processes", get(processes_handler))
        .route("/api/activity", get(activity_handler))
        // Deployments
        .route("/api/deployments", post(deploy_handler))
        .route("/ws/deployments", get(deploy_ws_handler))
        .route("/ws/events", get(events_ws_handler))
        // Projects
        .route("/api/projects", get(projects_handler))
        .route("/api/projects/{id}", delete(delete_project_handler))
        .route(
            "/api/projects/{id}/deployments",
            get(project_deployments_handler),
        )
        .route("/api/projects/{id}/env-policy", get(env_policy_handler))
        .route("/api/projects/{id}/start", post(start_handler))
        .route("/api/projects/{id}/stop", post(stop_handler))
        .route("/api/projects/{id}/restart", post(restart_handler))
        .route("/api/projects/{id}/restart-env", post(restart_env_handler))
        // State and middleware
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), DeployError>>, DeployError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| DeployError::ServerError(e.to_string()))
    });

    Ok(handle)
}
