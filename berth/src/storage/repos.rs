//! Repository contracts consumed by the core

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

use crate::analyzer::Strategy;
use crate::errors::DeployError;
use crate::models::activity::Activity;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::project::Project;

/// Decrypted project environment, values never printed by `Debug`
pub type EnvVars = BTreeMap<String, SecretString>;

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<Project>, DeployError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Project>, DeployError>;

    async fn get_by_name(&self, name: &str) -> Result<Option<Project>, DeployError>;

    /// Fails when the id or the name is already taken
    async fn create(&self, project: &Project) -> Result<(), DeployError>;

    async fn update(&self, project: &Project) -> Result<(), DeployError>;

    async fn delete(&self, id: &str) -> Result<(), DeployError>;
}

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn create(&self, deployment: &Deployment) -> Result<(), DeployError>;

    async fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), DeployError>;

    async fn set_build_mode(&self, id: &str, mode: Strategy) -> Result<(), DeployError>;

    async fn append_logs(&self, id: &str, text: &str) -> Result<(), DeployError>;

    async fn get_latest_by_project(
        &self,
        project_id: &str,
    ) -> Result<Option<Deployment>, DeployError>;

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Deployment>, DeployError>;
}

#[async_trait]
pub trait PortRepository: Send + Sync {
    /// Persist an allocation; fails if the port or the service is already taken
    async fn allocate(&self, port: u16, service_id: &str) -> Result<(), DeployError>;

    async fn release(&self, port: u16) -> Result<(), DeployError>;

    async fn get_by_service(&self, service_id: &str) -> Result<Option<u16>, DeployError>;

    async fn allocated_ports(&self) -> Result<HashSet<u16>, DeployError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn append(&self, activity: &Activity) -> Result<(), DeployError>;

    async fn recent(&self, limit: usize) -> Result<Vec<Activity>, DeployError>;
}

#[async_trait]
pub trait EnvVarSource: Send + Sync {
    /// Decrypted env vars for a project; empty when it has none
    async fn decrypted(&self, project_id: &str) -> Result<EnvVars, DeployError>;
}
