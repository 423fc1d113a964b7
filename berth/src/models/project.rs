//! Project models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declared kind of application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProjectType {
    /// Plain Node server (express, fastify, ...)
    DynamicNode,
    /// Framework with its own server build (Next, Nuxt, Remix, ...)
    DynamicFramework,
    /// Bundled SPA that must be built before serving
    StaticBuildable,
    /// Ready-to-serve HTML/CSS/JS
    StaticPlain,
}

impl ProjectType {
    /// Served from disk by the proxy, with no process behind it
    pub fn is_static(&self) -> bool {
        matches!(self, ProjectType::StaticBuildable | ProjectType::StaticPlain)
    }

    /// Runs as a supervised process and therefore owns a port
    pub fn requires_process(&self) -> bool {
        !self.is_static()
    }

    /// Needs a `package.json` to be deployable
    pub fn requires_manifest(&self) -> bool {
        self.requires_process()
    }

    /// Produces its served output through a build command
    pub fn is_buildable(&self) -> bool {
        matches!(
            self,
            ProjectType::DynamicFramework | ProjectType::StaticBuildable
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::DynamicNode => "dynamic-node",
            ProjectType::DynamicFramework => "dynamic-framework",
            ProjectType::StaticBuildable => "static-buildable",
            ProjectType::StaticPlain => "static-plain",
        }
    }
}

/// Node package manager, chosen from the lock file present
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    pub fn bin(&self) -> &'static str {
        match self {
            PackageManager::Npm => "npm",
            PackageManager::Yarn => "yarn",
            PackageManager::Pnpm => "pnpm",
        }
    }

    /// Arguments installing every dependency, dev dependencies included
    pub fn install_args(&self) -> Vec<&'static str> {
        match self {
            PackageManager::Npm => vec!["install", "--include=dev", "--no-audit", "--no-fund"],
            PackageManager::Yarn => vec!["install", "--production=false"],
            PackageManager::Pnpm => vec!["install", "--prod=false"],
        }
    }

    /// Arguments running a manifest script
    pub fn run_args<'a>(&self, script: &'a str) -> Vec<&'a str> {
        vec!["run", script]
    }
}

/// Where a deployment was submitted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentSource {
    #[default]
    Ui,
    Cli,
}

/// What the uploaded archive contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum UploadType {
    #[default]
    FullSource,
    DistOnly,
    Prebuilt,
}

/// A deployed application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Stable id, also the process name and directory name
    pub id: String,

    /// Unique human-facing name
    pub name: String,

    #[serde(rename = "type")]
    pub project_type: ProjectType,

    /// Assigned port, only for process-backed projects
    pub port: Option<u16>,

    pub package_manager: Option<PackageManager>,

    /// Custom domains routed to this project
    #[serde(default)]
    pub domains: Vec<String>,

    /// Directory (relative to the live dir) the proxy serves for static projects
    #[serde(default)]
    pub serve_dir: Option<String>,

    #[serde(default)]
    pub deployment_source: DeploymentSource,

    #[serde(default)]
    pub upload_type: UploadType,

    /// Env vars were available when the served output was built
    #[serde(default)]
    pub env_injected_at_build: bool,

    /// Source code (not only build output) is present on disk
    #[serde(default = "default_true")]
    pub has_source: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

impl Project {
    /// Routing path segment derived from the name
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// Lower-case a name and replace everything outside `[a-z0-9-]` with `-`
pub fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
