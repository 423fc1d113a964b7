//! Deployment orchestrator
//!
//! Turns an uploaded archive into a running, routable project. All work
//! happens in a staging directory; the live directory is only replaced once
//! the build has been verified, so a failed attempt never disturbs the
//! previous deployment.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::analyzer::{self, Analysis, Severity};
use crate::deploy::archive;
use crate::deploy::build::Builder;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::locks::ProjectLocks;
use crate::deploy::patches::apply_subpath_patches;
use crate::errors::DeployError;
use crate::events::activity::ActivityLogger;
use crate::events::bus::{ControlEvent, EventBus};
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::activity::ActivityKind;
use crate::models::deployment::{DeployProgress, DeployRequest, Deployment, DeploymentStatus};
use crate::models::project::{slugify, PackageManager, Project, ProjectType, UploadType};
use crate::ports::PortAllocator;
use crate::proxy::ProxyManager;
use crate::runtime::{RuntimeLifecycle, StartCommand};
use crate::storage::layout::StorageLayout;
use crate::storage::repos::{DeploymentRepository, EnvVarSource, ProjectRepository};

/// Everything the orchestrator drives
pub struct OrchestratorDeps {
    pub layout: StorageLayout,
    pub projects: Arc<dyn ProjectRepository>,
    pub deployments: Arc<dyn DeploymentRepository>,
    pub env_source: Arc<dyn EnvVarSource>,
    pub ports: Arc<PortAllocator>,
    pub proxy: Arc<ProxyManager>,
    pub runtime: Arc<dyn RuntimeLifecycle>,
    pub builder: Builder,
    pub activity: Arc<ActivityLogger>,
    pub bus: EventBus,
    /// Bound on the post-start health poll
    pub health_timeout: Duration,
}

pub struct Orchestrator {
    deps: OrchestratorDeps,
    locks: ProjectLocks,
}

/// State of one pipeline run
struct Attempt<'a> {
    deployment_id: String,
    project_id: String,
    existing: Option<Project>,
    fsm: DeploymentFsm,
    staging: Dir,
    /// Allocated by this attempt, released again on failure
    new_port: Option<u16>,
    /// The project row and live dir now reflect this attempt
    committed: bool,
    progress: Option<&'a mpsc::Sender<DeployProgress>>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            deps,
            locks: ProjectLocks::new(),
        }
    }

    /// Deploy and return the live project
    pub async fn deploy(&self, request: DeployRequest) -> Result<Project, DeployError> {
        self.run(request, None).await
    }

    /// Deploy while pushing progress frames. The channel always receives
    /// exactly one `Completed` or `Failed` frame at the end; a closed
    /// receiver does not stop the pipeline.
    pub async fn deploy_streaming(
        &self,
        request: DeployRequest,
        tx: mpsc::Sender<DeployProgress>,
    ) -> Result<Project, DeployError> {
        let result = self.run(request, Some(&tx)).await;
        let frame = match &result {
            Ok(project) => DeployProgress::Completed {
                project: project.clone(),
            },
            Err(e) => DeployProgress::Failed {
                code: e.kind().to_string(),
                message: e.user_message(),
            },
        };
        let _ = tx.send(frame).await;
        result
    }

    async fn run(
        &self,
        request: DeployRequest,
        progress: Option<&mpsc::Sender<DeployProgress>>,
    ) -> Result<Project, DeployError> {
        let outcome = self.run_locked(&request, progress).await;
        self.remove_upload(&request).await;
        outcome
    }

    async fn run_locked(
        &self,
        request: &DeployRequest,
        progress: Option<&mpsc::Sender<DeployProgress>>,
    ) -> Result<Project, DeployError> {
        if let Err(e) = validate_request(request) {
            warn!("Rejected deployment of {:?}: {}", request.name, e);
            self.deps
                .activity
                .log(
                    ActivityKind::Error,
                    &request.name,
                    &format!("Deployment rejected: {}", e.user_message()),
                    None,
                )
                .await;
            return Err(e);
        }
        let _guard = self.locks.acquire(&request.name).await;

        let existing = self.deps.projects.get_by_name(&request.name).await?;
        let project_id = existing
            .as_ref()
            .map(|p| p.id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let deployment = Deployment {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.clone(),
            version: request.version.clone(),
            status: DeploymentStatus::Queued,
            build_mode: None,
            logs: String::new(),
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        };
        self.deps.deployments.create(&deployment).await?;
        info!(
            deployment_id = %deployment.id,
            project_id = %project_id,
            "Deploying {}",
            request.name
        );

        let mut attempt = Attempt {
            staging: self.deps.layout.staging_dir(&deployment.id),
            deployment_id: deployment.id,
            project_id,
            existing,
            fsm: DeploymentFsm::new(),
            new_port: None,
            committed: false,
            progress,
        };

        match self.execute(&mut attempt, request).await {
            Ok(project) => {
                self.finish_success(&mut attempt, &project).await?;
                Ok(project)
            }
            Err(e) => {
                self.finish_failure(&mut attempt, request, &e).await;
                Err(e)
            }
        }
    }

    /// Pipeline steps; any error aborts the rest
    async fn execute(
        &self,
        attempt: &mut Attempt<'_>,
        request: &DeployRequest,
    ) -> Result<Project, DeployError> {
        self.transition(attempt, DeploymentEvent::Build).await?;

        // 1. extract into staging
        attempt.staging.delete().await?;
        let extracted = archive::extract(&request.archive_path, attempt.staging.path()).await?;
        self.step(attempt, 10, &format!("Extracted {} files", extracted.file_count))
            .await;

        // 2. analyze and validate
        let analysis = analyzer::analyze(attempt.staging.path(), request.project_type);
        self.deps
            .deployments
            .set_build_mode(&attempt.deployment_id, analysis.strategy)
            .await?;
        for warning in &analysis.warnings {
            let level = match warning.severity {
                Severity::Info => "info",
                Severity::Warning => "warning",
                Severity::Critical => "critical",
            };
            self.log(attempt, &format!("[{}] {}: {}", level, warning.code, warning.message))
                .await;
        }
        if let Some(critical) = analysis.critical() {
            return Err(DeployError::Validation(critical.message.clone()));
        }
        self.step(
            attempt,
            20,
            &format!("Analyzed project, strategy {}", analysis.strategy.as_str()),
        )
        .await;

        // 3. install
        let package_manager = analysis.package_manager;
        let needs_install = analysis.has_manifest
            && (analysis.requires_build || request.project_type.requires_process());
        if needs_install {
            self.step(
                attempt,
                25,
                &format!("Installing dependencies with {}", package_manager.bin()),
            )
            .await;
            let tail = self
                .deps
                .builder
                .install(attempt.staging.path(), package_manager)
                .await?;
            self.log(attempt, &tail).await;
        }

        let will_build =
            analysis.requires_build && request.upload_type != UploadType::Prebuilt;

        // 4. sub-path patches, only for builds served under the path prefix
        let mut build_env = self.deps.env_source.decrypted(&attempt.project_id).await?;
        if will_build && request.domains.is_empty() {
            let base = format!(
                "{}/{}",
                self.deps.proxy.settings().path_prefix.trim_end_matches('/'),
                slugify(&request.name)
            );
            match apply_subpath_patches(attempt.staging.path(), &base).await {
                Ok(patches) => {
                    for applied in &patches.applied {
                        self.log(attempt, applied).await;
                    }
                    build_env.extend(patches.build_env);
                }
                Err(e) => {
                    warn!("Sub-path patches failed for {}: {}", request.name, e);
                    self.log(attempt, &format!("[warning] Sub-path patches skipped: {}", e))
                        .await;
                }
            }
        }

        // 5. build
        if will_build {
            self.step(attempt, 40, "Building").await;
            let tail = self
                .deps
                .builder
                .build(attempt.staging.path(), package_manager, &build_env)
                .await?;
            self.log(attempt, &tail).await;
        }

        // 6. verify, before touching any live state
        let serve_dir = self.verify(attempt, request.project_type, package_manager)?;
        self.step(attempt, 55, "Build output verified").await;
        self.transition(attempt, DeploymentEvent::Deploy).await?;

        // 7. port
        let port = if request.project_type.requires_process() {
            Some(self.assign_port(attempt).await?)
        } else {
            None
        };

        // 8. stop the old process before its directory goes away
        if let Some(old) = attempt.existing.clone() {
            self.retire_previous(attempt, &old, request.project_type)
                .await?;
        }

        // 9. swap
        let live = self.deps.layout.project_dir(&attempt.project_id);
        live.replace_with(&attempt.staging).await?;
        self.step(attempt, 65, "Live directory replaced").await;

        // 10. upsert the project
        let now = Utc::now();
        let project = Project {
            id: attempt.project_id.clone(),
            name: request.name.clone(),
            project_type: request.project_type,
            port,
            package_manager: analysis.has_manifest.then_some(package_manager),
            domains: request.domains.clone(),
            serve_dir,
            deployment_source: request.deployment_source,
            upload_type: request.upload_type,
            env_injected_at_build: will_build || request.env_injected_at_build,
            has_source: request.upload_type != UploadType::DistOnly,
            created_at: attempt
                .existing
                .as_ref()
                .map(|p| p.created_at)
                .unwrap_or(now),
            updated_at: now,
        };
        match &attempt.existing {
            Some(_) => self.deps.projects.update(&project).await?,
            None => self.deps.projects.create(&project).await?,
        }
        attempt.committed = true;
        self.step(attempt, 75, "Project registered").await;

        // 11. start
        self.deps.runtime.start(&project).await?;
        if project.project_type.requires_process() {
            self.step(attempt, 80, "Process started, waiting for it to come online")
                .await;
            let online = self
                .deps
                .runtime
                .wait_until_online(&project, self.deps.health_timeout)
                .await?;
            if !online {
                warn!(
                    "{} did not report online within {:?}",
                    project.name, self.deps.health_timeout
                );
                self.log(
                    attempt,
                    &format!(
                        "[warning] Process did not report online within {}s",
                        self.deps.health_timeout.as_secs()
                    ),
                )
                .await;
            }

            // 12. route; static projects were routed by starting them
            self.deps.proxy.update_project_config(&project).await?;
        }
        self.step(attempt, 95, "Proxy updated").await;

        Ok(project)
    }

    /// Check the staged tree is servable, returning the static serve dir
    fn verify(
        &self,
        attempt: &Attempt<'_>,
        project_type: ProjectType,
        package_manager: PackageManager,
    ) -> Result<Option<String>, DeployError> {
        let staged = attempt.staging.path();
        let analysis: Analysis = analyzer::analyze(staged, project_type);

        if project_type.is_static() {
            return analysis.static_root().map(Some).ok_or_else(|| {
                DeployError::Verification(
                    "No index.html found at the root or in a build output directory".to_string(),
                )
            });
        }

        if project_type.is_buildable()
            && !analysis.build_output.as_ref().is_some_and(|o| o.complete)
        {
            return Err(DeployError::Verification(
                "The build did not produce a complete output directory".to_string(),
            ));
        }
        if StartCommand::resolve(staged, package_manager).is_none() {
            return Err(DeployError::Verification(
                "No start script or server entry file found".to_string(),
            ));
        }
        Ok(None)
    }

    async fn assign_port(&self, attempt: &mut Attempt<'_>) -> Result<u16, DeployError> {
        let held = self.deps.ports.get_by_service(&attempt.project_id).await?;
        let port = self.deps.ports.allocate(&attempt.project_id).await?;
        if held.is_none() {
            attempt.new_port = Some(port);
            self.step(attempt, 60, &format!("Allocated port {}", port))
                .await;
        } else {
            self.step(attempt, 60, &format!("Reusing port {}", port))
                .await;
        }
        Ok(port)
    }

    async fn retire_previous(
        &self,
        attempt: &Attempt<'_>,
        old: &Project,
        new_type: ProjectType,
    ) -> Result<(), DeployError> {
        if !old.project_type.requires_process() {
            return Ok(());
        }
        if !new_type.requires_process() {
            // no longer a process; its port goes too once this attempt commits
            self.deps.runtime.delete(old).await?;
            return Ok(());
        }
        if self.deps.runtime.status(old).await?.is_running() {
            self.deps.runtime.stop(old).await?;
            self.step(attempt, 62, "Stopped previous process").await;
        }
        Ok(())
    }

    async fn finish_success(
        &self,
        attempt: &mut Attempt<'_>,
        project: &Project,
    ) -> Result<(), DeployError> {
        if let Some(old_port) = attempt.existing.as_ref().and_then(|p| p.port) {
            if project.port.is_none() {
                self.deps.ports.release(old_port).await?;
            }
        }

        attempt.fsm.process(DeploymentEvent::Succeed)?;
        self.deps
            .deployments
            .update_status(
                &attempt.deployment_id,
                DeploymentStatus::Success,
                None,
                attempt.fsm.completed_at(),
            )
            .await?;
        self.step(attempt, 100, "Deployment complete").await;

        let message = match &project.port {
            Some(port) => format!("Deployed {} on port {}", project.name, port),
            None => format!("Deployed {}", project.name),
        };
        self.deps
            .activity
            .log(
                ActivityKind::Deploy,
                &project.name,
                &message,
                Some(&attempt.deployment_id),
            )
            .await;
        self.deps.bus.publish(ControlEvent::ProjectChange {
            project_id: project.id.clone(),
        });
        info!(deployment_id = %attempt.deployment_id, "{}", message);
        Ok(())
    }

    /// Cleanup never masks the pipeline error; its own failures are logged
    async fn finish_failure(
        &self,
        attempt: &mut Attempt<'_>,
        request: &DeployRequest,
        err: &DeployError,
    ) {
        if attempt.committed {
            // live already, only the proxy or process view may be stale
            error!(
                deployment_id = %attempt.deployment_id,
                "{} is live on disk but could not be fully activated: {}",
                request.name,
                err
            );
        } else {
            error!(
                deployment_id = %attempt.deployment_id,
                "Deployment of {} failed: {}",
                request.name,
                err
            );
        }

        if let Err(e) = attempt.staging.delete().await {
            warn!("Failed to remove staging dir: {}", e);
        }
        if let (Some(port), false) = (attempt.new_port, attempt.committed) {
            if let Err(e) = self.deps.ports.release(port).await {
                warn!("Failed to release port {}: {}", port, e);
            }
        }

        let message = err.user_message();
        let completed_at = match attempt.fsm.process(DeploymentEvent::Fail(message.clone())) {
            Ok(_) => attempt.fsm.completed_at(),
            Err(e) => {
                warn!("{}", e);
                Some(Utc::now())
            }
        };
        self.log(attempt, &format!("[error] {}", message)).await;
        if let Err(e) = self
            .deps
            .deployments
            .update_status(
                &attempt.deployment_id,
                DeploymentStatus::Failed,
                Some(message.clone()),
                completed_at,
            )
            .await
        {
            warn!("Failed to record deployment failure: {}", e);
        }

        self.deps
            .activity
            .log(
                ActivityKind::Error,
                &request.name,
                &format!("Deployment failed: {}", message),
                Some(&attempt.deployment_id),
            )
            .await;
    }

    async fn transition(
        &self,
        attempt: &mut Attempt<'_>,
        event: DeploymentEvent,
    ) -> Result<(), DeployError> {
        let status = attempt.fsm.process(event)?;
        self.deps
            .deployments
            .update_status(&attempt.deployment_id, status, None, None)
            .await
    }

    /// Record a step message and push a progress frame
    async fn step(&self, attempt: &Attempt<'_>, percent: u8, message: &str) {
        info!(deployment_id = %attempt.deployment_id, "{}", message);
        self.log(attempt, message).await;
        if let Some(tx) = attempt.progress {
            let _ = tx
                .send(DeployProgress::Progress {
                    percent,
                    message: message.to_string(),
                })
                .await;
        }
    }

    async fn log(&self, attempt: &Attempt<'_>, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let line = format!("{}\n", text.trim_end());
        if let Err(e) = self
            .deps
            .deployments
            .append_logs(&attempt.deployment_id, &line)
            .await
        {
            warn!("Failed to append deployment log: {}", e);
        }
    }

    async fn remove_upload(&self, request: &DeployRequest) {
        if let Err(e) = File::new(&request.archive_path).delete().await {
            warn!(
                "Failed to remove upload {}: {}",
                request.archive_path.display(),
                e
            );
        }
    }

    /// Tear a project down: runtime, port, proxy, record, files
    pub async fn delete_project(&self, project_id: &str) -> Result<Project, DeployError> {
        let project = self
            .deps
            .projects
            .get_by_id(project_id)
            .await?
            .ok_or_else(|| DeployError::NotFound(format!("project {}", project_id)))?;
        let _guard = self.locks.acquire(&project.name).await;
        info!(project_id = %project.id, "Deleting {}", project.name);

        self.deps.runtime.delete(&project).await?;
        if let Some(port) = project.port {
            self.deps.ports.release(port).await?;
        }
        // static fragments went with the runtime
        if project.project_type.requires_process() {
            self.deps.proxy.delete_project_config(&project.id).await?;
        }
        self.deps.projects.delete(&project.id).await?;
        self.deps.layout.project_dir(&project.id).delete().await?;

        self.deps
            .activity
            .log(
                ActivityKind::Delete,
                &project.name,
                &format!("Deleted {}", project.name),
                None,
            )
            .await;
        self.deps.bus.publish(ControlEvent::ProjectChange {
            project_id: project.id.clone(),
        });
        Ok(project)
    }
}

fn validate_request(request: &DeployRequest) -> Result<(), DeployError> {
    if request.name.trim().is_empty() || slugify(&request.name).is_empty() {
        return Err(DeployError::Validation(
            "Project name must contain at least one letter or digit".to_string(),
        ));
    }
    if !request.archive_path.is_file() {
        return Err(DeployError::Validation(format!(
            "Uploaded archive not found: {}",
            request.archive_path.display()
        )));
    }
    if let Some(domain) = request.domains.iter().find(|d| !is_valid_domain(d)) {
        return Err(DeployError::Validation(format!(
            "Invalid domain {:?}: use a host name such as app.example.com",
            domain
        )));
    }
    Ok(())
}

/// Plain host name, optionally with a leading `*.` wildcard label
fn is_valid_domain(domain: &str) -> bool {
    let host = domain.strip_prefix("*.").unwrap_or(domain);
    !host.is_empty()
        && domain.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

