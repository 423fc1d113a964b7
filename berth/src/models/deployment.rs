//! Deployment models

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analyzer::Strategy;
use crate::models::project::{DeploymentSource, ProjectType, UploadType};

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Building,
    Deploying,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}

/// One build/deploy attempt for a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    pub project_id: String,

    /// Optional version label supplied by the uploader
    pub version: Option<String>,

    pub status: DeploymentStatus,

    pub build_mode: Option<Strategy>,

    /// Accumulated log text
    #[serde(default)]
    pub logs: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,
}

/// A request to deploy an uploaded archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Path of the uploaded archive on this host
    pub archive_path: PathBuf,

    /// Project name, unique across the host
    pub name: String,

    #[serde(rename = "type")]
    pub project_type: ProjectType,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub deployment_source: DeploymentSource,

    #[serde(default)]
    pub upload_type: UploadType,

    #[serde(default)]
    pub domains: Vec<String>,

    /// The uploader built the archive with the project's env vars present
    #[serde(default)]
    pub env_injected_at_build: bool,
}

/// Progress frame pushed to interactive clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeployProgress {
    Progress {
        percent: u8,
        message: String,
    },
    Completed {
        project: crate::models::project::Project,
    },
    Failed {
        code: String,
        message: String,
    },
}
