//! JSON file backed repositories
//!
//! All tables live in one document that is rewritten atomically after every
//! mutation. Mutations are serialized by a single mutex, which makes each
//! single-row operation atomic.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::analyzer::Strategy;
use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::activity::Activity;
use crate::models::deployment::{Deployment, DeploymentStatus};
use crate::models::port::PortAllocation;
use crate::models::project::Project;
use crate::storage::repos::{
    ActivityRepository, DeploymentRepository, EnvVarSource, EnvVars, PortRepository,
    ProjectRepository,
};

const MAX_ACTIVITY_ENTRIES: usize = 1000;

/// Persisted state document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub projects: Vec<Project>,

    #[serde(default)]
    pub deployments: Vec<Deployment>,

    #[serde(default)]
    pub ports: Vec<PortAllocation>,

    #[serde(default)]
    pub activity: Vec<Activity>,

    /// Plaintext env vars per project id. Encryption at rest is handled by
    /// the secrets backend when one is configured.
    #[serde(default)]
    pub env_vars: BTreeMap<String, BTreeMap<String, String>>,
}

/// Repository implementation over a single JSON file
pub struct JsonStore {
    file: File,
    state: Mutex<StoreState>,
}

impl JsonStore {
    /// Open the store, starting empty if the file does not exist yet
    pub async fn open(file: File) -> Result<Self, DeployError> {
        let state = if file.exists().await {
            file.read_json::<StoreState>().await.map_err(|e| {
                DeployError::StorageError(format!(
                    "Failed to read {}: {}",
                    file.path().display(),
                    e
                ))
            })?
        } else {
            StoreState::default()
        };

        Ok(Self {
            file,
            state: Mutex::new(state),
        })
    }

    /// Snapshot of the whole document
    pub async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }

    /// Set a plaintext env var for a project
    pub async fn set_env_var(
        &self,
        project_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), DeployError> {
        self.mutate(|state| {
            state
                .env_vars
                .entry(project_id.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
            Ok(())
        })
        .await
    }

    /// Apply `f` to the state and persist it if `f` succeeds
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StoreState) -> Result<T, DeployError>,
    ) -> Result<T, DeployError> {
        let mut guard = self.state.lock().await;
        let mut next = guard.clone();
        let result = f(&mut next)?;

        let bytes = serde_json::to_vec_pretty(&next)?;
        self.file.write_atomic(&bytes).await?;
        *guard = next;

        Ok(result)
    }
}

#[async_trait]
impl ProjectRepository for JsonStore {
    async fn get_all(&self) -> Result<Vec<Project>, DeployError> {
        Ok(self.state.lock().await.projects.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Project>, DeployError> {
        let state = self.state.lock().await;
        Ok(state.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Project>, DeployError> {
        let state = self.state.lock().await;
        Ok(state.projects.iter().find(|p| p.name == name).cloned())
    }

    async fn create(&self, project: &Project) -> Result<(), DeployError> {
        self.mutate(|state| {
            if state
                .projects
                .iter()
                .any(|p| p.id == project.id || p.name == project.name)
            {
                return Err(DeployError::StorageError(format!(
                    "Project {} already exists",
                    project.name
                )));
            }
            state.projects.push(project.clone());
            Ok(())
        })
        .await
    }

    async fn update(&self, project: &Project) -> Result<(), DeployError> {
        self.mutate(|state| {
            let existing = state
                .projects
                .iter_mut()
                .find(|p| p.id == project.id)
                .ok_or_else(|| DeployError::NotFound(format!("project {}", project.id)))?;
            *existing = project.clone();
            Ok(())
        })
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), DeployError> {
        self.mutate(|state| {
            state.projects.retain(|p| p.id != id);
            state.env_vars.remove(id);
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl DeploymentRepository for JsonStore {
    async fn create(&self, deployment: &Deployment) -> Result<(), DeployError> {
        self.mutate(|state| {
            state.deployments.push(deployment.clone());
            Ok(())
        })
        .await
    }

    async fn update_status(
        &self,
        id: &str,
        status: DeploymentStatus,
        error_message: Option<String>,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<(), DeployError> {
        self.mutate(|state| {
            let deployment = state
                .deployments
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))?;
            deployment.status = status;
            if error_message.is_some() {
                deployment.error_message = error_message;
            }
            if completed_at.is_some() {
                deployment.completed_at = completed_at;
            }
            Ok(())
        })
        .await
    }

    async fn set_build_mode(&self, id: &str, mode: Strategy) -> Result<(), DeployError> {
        self.mutate(|state| {
            let deployment = state
                .deployments
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))?;
            deployment.build_mode = Some(mode);
            Ok(())
        })
        .await
    }

    async fn append_logs(&self, id: &str, text: &str) -> Result<(), DeployError> {
        self.mutate(|state| {
            let deployment = state
                .deployments
                .iter_mut()
                .find(|d| d.id == id)
                .ok_or_else(|| DeployError::NotFound(format!("deployment {}", id)))?;
            deployment.logs.push_str(text);
            Ok(())
        })
        .await
    }

    async fn get_latest_by_project(
        &self,
        project_id: &str,
    ) -> Result<Option<Deployment>, DeployError> {
        let state = self.state.lock().await;
        Ok(state
            .deployments
            .iter()
            .filter(|d| d.project_id == project_id)
            .max_by_key(|d| d.started_at)
            .cloned())
    }

    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Deployment>, DeployError> {
        let state = self.state.lock().await;
        Ok(state
            .deployments
            .iter()
            .filter(|d| d.project_id == project_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PortRepository for JsonStore {
    async fn allocate(&self, port: u16, service_id: &str) -> Result<(), DeployError> {
        self.mutate(|state| {
            if let Some(existing) = state
                .ports
                .iter()
                .find(|a| a.port == port || a.service_id == service_id)
            {
                return Err(DeployError::StorageError(format!(
                    "Port {} is already held by {}",
                    existing.port, existing.service_id
                )));
            }
            state.ports.push(PortAllocation {
                port,
                service_id: service_id.to_string(),
                allocated_at: Utc::now(),
            });
            debug!("Persisted port {} for {}", port, service_id);
            Ok(())
        })
        .await
    }

    async fn release(&self, port: u16) -> Result<(), DeployError> {
        self.mutate(|state| {
            state.ports.retain(|a| a.port != port);
            Ok(())
        })
        .await
    }

    async fn get_by_service(&self, service_id: &str) -> Result<Option<u16>, DeployError> {
        let state = self.state.lock().await;
        Ok(state
            .ports
            .iter()
            .find(|a| a.service_id == service_id)
            .map(|a| a.port))
    }

    async fn allocated_ports(&self) -> Result<HashSet<u16>, DeployError> {
        let state = self.state.lock().await;
        Ok(state.ports.iter().map(|a| a.port).collect())
    }
}

#[async_trait]
impl ActivityRepository for JsonStore {
    async fn append(&self, activity: &Activity) -> Result<(), DeployError> {
        self.mutate(|state| {
            state.activity.push(activity.clone());
            if state.activity.len() > MAX_ACTIVITY_ENTRIES {
                let excess = state.activity.len() - MAX_ACTIVITY_ENTRIES;
                state.activity.drain(..excess);
            }
            Ok(())
        })
        .await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Activity>, DeployError> {
        let state = self.state.lock().await;
        Ok(state.activity.iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl EnvVarSource for JsonStore {
    async fn decrypted(&self, project_id: &str) -> Result<EnvVars, DeployError> {
        let state = self.state.lock().await;
        Ok(state
            .env_vars
            .get(project_id)
            .map(|vars| {
                vars.iter()
                    .map(|(k, v)| (k.clone(), SecretString::from(v.clone())))
                    .collect()
            })
            .unwrap_or_default())
    }
}
