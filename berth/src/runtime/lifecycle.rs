//! Runtime lifecycle for both workload variants

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::DeployError;
use crate::events::bus::{ControlEvent, EventBus};
use crate::models::project::{PackageManager, Project};
use crate::proxy::ProxyManager;
use crate::runtime::supervisor::{
    ProcessDescriptor, ProcessState, StartCommand, SupervisedProcess, SupervisorConnection,
};
use crate::storage::layout::StorageLayout;
use crate::storage::repos::{EnvVarSource, EnvVars, ProjectRepository};
use crate::storage::settings::SupervisorSettings;

/// What keeps a project reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// A supervised process, named after the project id
    Process {
        name: String,
        cwd: PathBuf,
        port: u16,
        package_manager: PackageManager,
    },
    /// Files served by the proxy; running means the fragment exists
    Static { fragment: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadKind {
    Process,
    Static,
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Workload::Process { .. } => WorkloadKind::Process,
            Workload::Static { .. } => WorkloadKind::Static,
        }
    }
}

/// Start/stop/restart/delete/status for any project
#[async_trait]
pub trait RuntimeLifecycle: Send + Sync {
    async fn start(&self, project: &Project) -> Result<(), DeployError>;

    async fn stop(&self, project: &Project) -> Result<(), DeployError>;

    async fn restart(&self, project: &Project) -> Result<(), DeployError>;

    /// Remove the workload; an unknown workload is not an error
    async fn delete(&self, project: &Project) -> Result<(), DeployError>;

    async fn status(&self, project: &Project) -> Result<ProcessState, DeployError>;

    /// Re-create the process so it picks up the current env vars. Buildable
    /// static sites bake values in at build time and are refused.
    async fn restart_with_env(&self, project: &Project) -> Result<(), DeployError>;

    /// Poll until the workload reports online. `Ok(false)` on timeout.
    async fn wait_until_online(
        &self,
        project: &Project,
        timeout: Duration,
    ) -> Result<bool, DeployError>;
}

/// One row of the process listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub project_id: String,
    pub name: String,
    pub kind: WorkloadKind,
    pub status: ProcessState,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub uptime_ms: u64,
    pub cpu: f32,
    pub memory: u64,
}

/// Outcome of a boot-time reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub started: Vec<String>,
    pub already_running: Vec<String>,
    pub failed: Vec<String>,
}

/// Routes lifecycle calls to the supervisor or the proxy
pub struct RuntimeManager {
    connection: SupervisorConnection,
    proxy: Arc<ProxyManager>,
    projects: Arc<dyn ProjectRepository>,
    env_source: Arc<dyn EnvVarSource>,
    bus: EventBus,
    layout: StorageLayout,
    settings: SupervisorSettings,
    poll_interval: Duration,
}

impl RuntimeManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection: SupervisorConnection,
        proxy: Arc<ProxyManager>,
        projects: Arc<dyn ProjectRepository>,
        env_source: Arc<dyn EnvVarSource>,
        bus: EventBus,
        layout: StorageLayout,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            connection,
            proxy,
            projects,
            env_source,
            bus,
            layout,
            settings,
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.health_timeout_secs)
    }

    /// Pick the workload variant for a project
    pub fn workload(&self, project: &Project) -> Result<Workload, DeployError> {
        if project.project_type.is_static() {
            let fragment = self
                .proxy
                .settings()
                .projects_dir
                .join(format!("{}.caddy", project.id));
            return Ok(Workload::Static { fragment });
        }

        let port = project.port.ok_or_else(|| {
            DeployError::Internal(format!("Project {} has no port assigned", project.name))
        })?;
        Ok(Workload::Process {
            name: project.id.clone(),
            cwd: self.layout.project_dir(&project.id).path().to_path_buf(),
            port,
            package_manager: project.package_manager.unwrap_or_default(),
        })
    }

    async fn descriptor(
        &self,
        project: &Project,
        name: &str,
        cwd: &Path,
        port: u16,
        package_manager: PackageManager,
    ) -> Result<ProcessDescriptor, DeployError> {
        let command = StartCommand::resolve(cwd, package_manager).ok_or_else(|| {
            DeployError::Verification(format!(
                "No start command found for {}: add a \"start\" script or a server entry file",
                project.name
            ))
        })?;

        let mut env: EnvVars = self.env_source.decrypted(&project.id).await?;
        env.entry("NODE_ENV".to_string())
            .or_insert_with(|| SecretString::from("production"));
        env.insert("PORT".to_string(), SecretString::from(port.to_string()));
        env.insert("HOST".to_string(), SecretString::from("127.0.0.1"));

        let logs = self.layout.process_logs_dir();
        Ok(ProcessDescriptor {
            name: name.to_string(),
            cwd: cwd.to_path_buf(),
            command,
            env,
            out_file: logs.path().join(format!("{}.out.log", name)),
            error_file: logs.path().join(format!("{}.err.log", name)),
            max_memory_restart: self.settings.max_memory.clone(),
            max_restarts: self.settings.max_restarts,
            restart_delay_ms: self.settings.restart_delay_ms,
        })
    }

    fn notify(&self, project: &Project, status: ProcessState) {
        self.bus.publish(ControlEvent::ProcessChange {
            project_id: project.id.clone(),
            status: status.as_str().to_string(),
        });
    }

    /// Start a process from a freshly rendered descriptor, replacing any stale one
    async fn launch(&self, project: &Project, workload: &Workload) -> Result<(), DeployError> {
        let Workload::Process {
            name,
            cwd,
            port,
            package_manager,
        } = workload
        else {
            return Ok(());
        };

        let descriptor = self
            .descriptor(project, name, cwd, *port, *package_manager)
            .await?;
        self.connection
            .with_session(|sup| async move {
                sup.delete(&descriptor.name).await?;
                sup.start(&descriptor).await
            })
            .await?;

        info!("Launched {} on port {}", project.name, port);
        self.notify(project, ProcessState::Launching);
        Ok(())
    }

    async fn list_supervised(&self) -> Result<Vec<SupervisedProcess>, DeployError> {
        self.connection
            .with_session(|sup| async move { sup.list().await })
            .await
    }

    /// Supervisor stats merged with synthesized rows for static projects
    pub async fn get_processes(&self) -> Result<Vec<ProcessInfo>, DeployError> {
        let projects = self.projects.get_all().await?;
        let live = self.list_supervised().await?;

        let mut rows = Vec::with_capacity(projects.len());
        for project in projects {
            if project.project_type.is_static() {
                let status = if self.proxy.fragment_exists(&project.id).await {
                    ProcessState::Online
                } else {
                    ProcessState::Stopped
                };
                rows.push(ProcessInfo {
                    project_id: project.id,
                    name: project.name,
                    kind: WorkloadKind::Static,
                    status,
                    port: None,
                    pid: None,
                    uptime_ms: 0,
                    cpu: 0.0,
                    memory: 0,
                });
                continue;
            }

            let process = live.iter().find(|p| p.name == project.id);
            rows.push(ProcessInfo {
                kind: WorkloadKind::Process,
                status: process.map(|p| p.status).unwrap_or(ProcessState::Stopped),
                port: project.port,
                pid: process.and_then(|p| p.pid),
                uptime_ms: process.map(|p| p.uptime_ms).unwrap_or(0),
                cpu: process.map(|p| p.cpu).unwrap_or(0.0),
                memory: process.map(|p| p.memory).unwrap_or(0),
                project_id: project.id,
                name: project.name,
            });
        }
        Ok(rows)
    }

    /// Start every registered process-backed project the supervisor is not running
    pub async fn reconcile(&self) -> Result<ReconcileReport, DeployError> {
        info!("Reconciling supervised processes...");
        let projects = self.projects.get_all().await?;
        let live = self.list_supervised().await?;

        let mut report = ReconcileReport::default();
        for project in projects
            .iter()
            .filter(|p| p.project_type.requires_process())
        {
            let running = live
                .iter()
                .any(|p| p.name == project.id && p.status.is_running());
            if running {
                report.already_running.push(project.name.clone());
                continue;
            }

            match self.start(project).await {
                Ok(()) => report.started.push(project.name.clone()),
                Err(e) => {
                    warn!("Failed to restore {}: {}", project.name, e);
                    report.failed.push(project.name.clone());
                }
            }
        }

        info!(
            "Reconciliation done: {} started, {} already running, {} failed",
            report.started.len(),
            report.already_running.len(),
            report.failed.len()
        );
        Ok(report)
    }
}

#[async_trait]
impl RuntimeLifecycle for RuntimeManager {
    async fn start(&self, project: &Project) -> Result<(), DeployError> {
        let workload = self.workload(project)?;
        match &workload {
            Workload::Process { .. } => self.launch(project, &workload).await,
            Workload::Static { .. } => {
                self.proxy.update_project_config(project).await?;
                self.notify(project, ProcessState::Online);
                Ok(())
            }
        }
    }

    async fn stop(&self, project: &Project) -> Result<(), DeployError> {
        match self.workload(project)? {
            Workload::Process { name, .. } => {
                self.connection
                    .with_session(|sup| async move { sup.stop(&name).await })
                    .await?;
            }
            Workload::Static { .. } => self.proxy.delete_project_config(&project.id).await?,
        }
        info!("Stopped {}", project.name);
        self.notify(project, ProcessState::Stopped);
        Ok(())
    }

    async fn restart(&self, project: &Project) -> Result<(), DeployError> {
        match self.workload(project)? {
            Workload::Process { name, .. } => {
                self.connection
                    .with_session(|sup| async move { sup.restart(&name).await })
                    .await?;
            }
            Workload::Static { .. } => self.proxy.update_project_config(project).await?,
        }
        info!("Restarted {}", project.name);
        self.notify(project, ProcessState::Online);
        Ok(())
    }

    async fn delete(&self, project: &Project) -> Result<(), DeployError> {
        match self.workload(project) {
            Ok(Workload::Static { .. }) => {
                self.proxy.delete_project_config(&project.id).await?
            }
            // a process project without a port never got a process
            Ok(Workload::Process { .. }) | Err(_) => {
                let name = project.id.clone();
                self.connection
                    .with_session(|sup| async move { sup.delete(&name).await })
                    .await?;
            }
        }
        self.notify(project, ProcessState::Stopped);
        Ok(())
    }

    async fn status(&self, project: &Project) -> Result<ProcessState, DeployError> {
        match self.workload(project)? {
            Workload::Process { name, .. } => {
                let live = self.list_supervised().await?;
                Ok(live
                    .into_iter()
                    .find(|p| p.name == name)
                    .map(|p| p.status)
                    .unwrap_or(ProcessState::Stopped))
            }
            Workload::Static { .. } => Ok(if self.proxy.fragment_exists(&project.id).await {
                ProcessState::Online
            } else {
                ProcessState::Stopped
            }),
        }
    }

    async fn restart_with_env(&self, project: &Project) -> Result<(), DeployError> {
        let workload = self.workload(project)?;
        match &workload {
            Workload::Process { .. } => self.launch(project, &workload).await,
            // values are baked into the build output; only a rebuild applies them
            Workload::Static { .. } if project.project_type.is_buildable() => {
                Err(DeployError::Validation(format!(
                    "Env changes for {} only take effect when it is rebuilt, redeploy it to apply them",
                    project.name
                )))
            }
            Workload::Static { .. } => self.restart(project).await,
        }
    }

    async fn wait_until_online(
        &self,
        project: &Project,
        timeout: Duration,
    ) -> Result<bool, DeployError> {
        let name = match self.workload(project)? {
            Workload::Process { name, .. } => name,
            Workload::Static { .. } => return Ok(true),
        };

        // one short session per poll so other callers can use the supervisor in between
        let deadline = Instant::now() + timeout;
        loop {
            let online = self
                .list_supervised()
                .await?
                .iter()
                .any(|p| p.name == name && p.status == ProcessState::Online);
            if online {
                return Ok(true);
            }
            if Instant::now() + self.poll_interval > deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
