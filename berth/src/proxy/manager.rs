//! Reverse proxy configuration manager

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analyzer::detect_build_output;
use crate::errors::DeployError;
use crate::exec::CommandRunner;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::project::Project;
use crate::proxy::caddyfile::{
    projects_import, render_domain_fragment, render_main, render_path_fragment, Upstream,
};
use crate::proxy::reload::ProxyReloader;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::ProxySettings;

/// Owns the fragment directories and the master Caddyfile
pub struct ProxyManager {
    settings: ProxySettings,
    control_port: u16,
    layout: StorageLayout,
    reloader: ProxyReloader,
    /// Serializes master regeneration and reloads
    lock: Mutex<()>,
}

impl ProxyManager {
    pub fn new(
        settings: ProxySettings,
        control_port: u16,
        layout: StorageLayout,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let reloader = ProxyReloader::new(&settings, runner);
        Self::with_reloader(settings, control_port, layout, reloader)
    }

    pub fn with_reloader(
        settings: ProxySettings,
        control_port: u16,
        layout: StorageLayout,
        reloader: ProxyReloader,
    ) -> Self {
        Self {
            settings,
            control_port,
            layout,
            reloader,
            lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    fn main_file(&self) -> File {
        File::new(&self.settings.main_config)
    }

    fn path_fragment(&self, project_id: &str) -> File {
        Dir::new(&self.settings.projects_dir).file(&format!("{}.caddy", project_id))
    }

    fn domain_fragment(&self, project_id: &str) -> File {
        Dir::new(&self.settings.domains_dir).file(&format!("{}.caddy", project_id))
    }

    /// Create the fragment directories, regenerate the master file and reload
    pub async fn initialize(&self) -> Result<(), DeployError> {
        info!("Initializing proxy configuration...");
        Dir::new(&self.settings.projects_dir).create().await?;
        Dir::new(&self.settings.domains_dir).create().await?;

        let _guard = self.lock.lock().await;
        self.write_main_config().await?;
        self.reloader.reload().await?;
        Ok(())
    }

    /// Regenerate the master file from settings (not patched in place)
    pub async fn refresh_main_config(&self) -> Result<(), DeployError> {
        let _guard = self.lock.lock().await;
        self.write_main_config().await
    }

    async fn write_main_config(&self) -> Result<(), DeployError> {
        let contents = render_main(&self.settings, self.control_port);
        self.main_file().write_atomic(contents.as_bytes()).await?;
        debug!("Wrote {}", self.settings.main_config.display());
        Ok(())
    }

    /// Directory the proxy serves for a static project
    pub fn static_root(&self, project: &Project) -> PathBuf {
        let live = self.layout.project_dir(&project.id);
        match &project.serve_dir {
            Some(dir) if dir != "." => live.path().join(dir),
            Some(_) => live.path().to_path_buf(),
            None => match detect_build_output(live.path()) {
                Some(output) if output.complete => live.path().join(output.dir),
                _ => live.path().to_path_buf(),
            },
        }
    }

    /// Write the project's fragments without reloading
    pub async fn write_project_config(&self, project: &Project) -> Result<(), DeployError> {
        let root = self.static_root(project);
        let upstream = Upstream::for_project(project, &root)?;

        let path_fragment =
            render_path_fragment(project, &self.settings.path_prefix, &upstream);
        self.path_fragment(&project.id)
            .write_atomic(path_fragment.as_bytes())
            .await?;

        match render_domain_fragment(project, &upstream) {
            Some(domains) => {
                self.domain_fragment(&project.id)
                    .write_atomic(domains.as_bytes())
                    .await?
            }
            None => self.domain_fragment(&project.id).delete().await?,
        }

        Ok(())
    }

    /// Write the project's fragments, regenerate the master file and reload.
    ///
    /// When the proxy rejects the result, the project's previous fragments are
    /// put back so one bad project cannot block reloads for every other one.
    pub async fn update_project_config(&self, project: &Project) -> Result<(), DeployError> {
        info!("Updating proxy config for {}", project.name);
        let _guard = self.lock.lock().await;

        let previous = FragmentSnapshot::take(self, &project.id).await?;
        let result = match self.write_project_config(project).await {
            Ok(()) => match self.write_main_config().await {
                Ok(()) => self.reload_locked().await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        if let Err(DeployError::InvalidProxyConfig(detail)) = &result {
            warn!(
                "Proxy rejected the config for {}, restoring previous fragments: {}",
                project.name, detail
            );
            previous.restore(self).await?;
        }
        result
    }

    /// Remove the project's fragments, regenerate the master file and reload
    pub async fn delete_project_config(&self, project_id: &str) -> Result<(), DeployError> {
        info!("Removing proxy config for {}", project_id);
        self.path_fragment(project_id).delete().await?;
        self.domain_fragment(project_id).delete().await?;

        let _guard = self.lock.lock().await;
        self.write_main_config().await?;
        self.reload_locked().await
    }

    /// Whether a path fragment exists; for static projects this is "running"
    pub async fn fragment_exists(&self, project_id: &str) -> bool {
        self.path_fragment(project_id).exists().await
    }

    /// Reload the proxy with the current config
    pub async fn reload(&self) -> Result<(), DeployError> {
        let _guard = self.lock.lock().await;
        self.reload_locked().await
    }

    async fn reload_locked(&self) -> Result<(), DeployError> {
        self.ensure_import_directive().await?;
        self.reloader.reload().await.map(|_| ())
    }

    /// Regenerate the master file if an external edit dropped the fragment import
    async fn ensure_import_directive(&self) -> Result<(), DeployError> {
        let import = projects_import(&self.settings);
        let intact = match self.main_file().read_string().await {
            Ok(contents) => contents.contains(&import),
            Err(_) => false,
        };

        if !intact {
            warn!("Main proxy config is missing the fragment import, regenerating it");
            self.write_main_config().await?;
        }
        Ok(())
    }
}

/// Fragment contents of one project as they were before an update
struct FragmentSnapshot {
    project_id: String,
    path: Option<Vec<u8>>,
    domains: Option<Vec<u8>>,
}

impl FragmentSnapshot {
    async fn take(manager: &ProxyManager, project_id: &str) -> Result<Self, DeployError> {
        Ok(Self {
            project_id: project_id.to_string(),
            path: manager.path_fragment(project_id).read_if_exists().await?,
            domains: manager.domain_fragment(project_id).read_if_exists().await?,
        })
    }

    async fn restore(self, manager: &ProxyManager) -> Result<(), DeployError> {
        restore_file(manager.path_fragment(&self.project_id), self.path).await?;
        restore_file(manager.domain_fragment(&self.project_id), self.domains).await
    }
}

async fn restore_file(file: File, contents: Option<Vec<u8>>) -> Result<(), DeployError> {
    match contents {
        Some(bytes) => file.write_atomic(&bytes).await,
        None => file.delete().await,
    }
}
