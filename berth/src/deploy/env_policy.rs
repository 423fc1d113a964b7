//! Env var mutability classification
//!
//! Decides whether changing a project's env vars can take effect after
//! deployment, and tells the user why not when it cannot.

use serde::Serialize;

use crate::models::project::{DeploymentSource, Project, ProjectType, UploadType};

/// Inputs to the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvPolicyInput {
    pub project_type: ProjectType,
    pub upload_type: UploadType,
    pub deployment_source: DeploymentSource,
    pub env_injected_at_build: bool,
    pub has_source: bool,
}

impl From<&Project> for EnvPolicyInput {
    fn from(project: &Project) -> Self {
        Self {
            project_type: project.project_type,
            upload_type: project.upload_type,
            deployment_source: project.deployment_source,
            env_injected_at_build: project.env_injected_at_build,
            has_source: project.has_source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImmutableReason {
    StaticProject,
    NoSource,
    BuiltWithoutEnv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mutability", rename_all = "lowercase")]
pub enum EnvMutability {
    Mutable,
    Immutable {
        reason: ImmutableReason,
        message: String,
    },
}

impl EnvMutability {
    pub fn is_mutable(&self) -> bool {
        matches!(self, EnvMutability::Mutable)
    }
}

/// Rules are checked in priority order; the first match wins.
///
/// Plain static sites have neither a runtime nor a build, so nothing can
/// pick up new values. Buildable static sites can, through a rebuild, as
/// long as their source is on the host.
pub fn classify(input: EnvPolicyInput) -> EnvMutability {
    if input.project_type == ProjectType::StaticPlain {
        return EnvMutability::Immutable {
            reason: ImmutableReason::StaticProject,
            message: "Static sites have no runtime to receive environment variables. \
                      Edit the files and redeploy instead."
                .to_string(),
        };
    }

    if input.project_type.requires_process() {
        return EnvMutability::Mutable;
    }

    if input.upload_type == UploadType::DistOnly || !input.has_source {
        return EnvMutability::Immutable {
            reason: ImmutableReason::NoSource,
            message: "This project was deployed without its source, so it cannot be \
                      rebuilt with new values. Redeploy with the full source."
                .to_string(),
        };
    }

    if input.deployment_source == DeploymentSource::Cli
        && input.upload_type == UploadType::Prebuilt
        && !input.env_injected_at_build
    {
        return EnvMutability::Immutable {
            reason: ImmutableReason::BuiltWithoutEnv,
            message: "This project was built locally without environment variables. \
                      Rebuild with the variables set and redeploy."
                .to_string(),
        };
    }

    EnvMutability::Mutable
}
