//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the control plane
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Persisted repositories
    pub fn state_file(&self) -> File {
        File::new(self.base_dir.join("state.json"))
    }

    /// Parent of every live project directory
    pub fn projects_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("projects"))
    }

    /// Live directory of one project
    pub fn project_dir(&self, project_id: &str) -> Dir {
        self.projects_dir().subdir(project_id)
    }

    /// Parent of every staging directory
    pub fn staging_root(&self) -> Dir {
        Dir::new(self.base_dir.join("staging"))
    }

    /// Isolated workspace for one deployment attempt
    pub fn staging_dir(&self, deployment_id: &str) -> Dir {
        self.staging_root().subdir(deployment_id)
    }

    /// Uploaded archives awaiting deployment
    pub fn uploads_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("uploads"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Per-process log and descriptor files
    pub fn process_logs_dir(&self) -> Dir {
        self.logs_dir().subdir("processes")
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::DeployError> {
        self.projects_dir().create().await?;
        self.staging_root().create().await?;
        self.uploads_dir().create().await?;
        self.logs_dir().create().await?;
        self.process_logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/berth");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".berth");

        Self::new(base_dir)
    }
}
