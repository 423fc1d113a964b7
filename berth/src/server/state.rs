//! Server state

use std::sync::Arc;

use crate::deploy::Orchestrator;
use crate::errors::DeployError;
use crate::events::{ActivityLogger, EventBus};
use crate::models::project::Project;
use crate::runtime::RuntimeManager;
use crate::storage::repos::{ActivityRepository, DeploymentRepository, ProjectRepository};

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub runtime: Arc<RuntimeManager>,
    pub projects: Arc<dyn ProjectRepository>,
    pub deployments: Arc<dyn DeploymentRepository>,
    pub activity_repo: Arc<dyn ActivityRepository>,
    pub activity: Arc<ActivityLogger>,
    pub bus: EventBus,
}

impl ServerState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        runtime: Arc<RuntimeManager>,
        projects: Arc<dyn ProjectRepository>,
        deployments: Arc<dyn DeploymentRepository>,
        activity_repo: Arc<dyn ActivityRepository>,
        activity: Arc<ActivityLogger>,
        bus: EventBus,
    ) -> Self {
        Self {
            orchestrator,
            runtime,
            projects,
            deployments,
            activity_repo,
            activity,
            bus,
        }
    }

    /// Look up a project or fail with `NotFound`
    pub async fn project(&self, id: &str) -> Result<Project, DeployError> {
        self.projects
            .get_by_id(id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("project {}", id)))
    }
}
