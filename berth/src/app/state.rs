//! Application state management

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::deploy::build::Builder;
use crate::deploy::{Orchestrator, OrchestratorDeps};
use crate::errors::DeployError;
use crate::events::{ActivityLogger, EventBus};
use crate::exec::{CommandRunner, TokioCommandRunner};
use crate::ports::PortAllocator;
use crate::proxy::ProxyManager;
use crate::runtime::{Pm2Supervisor, ProcessSupervisor, RuntimeManager, SupervisorConnection};
use crate::server::state::ServerState;
use crate::storage::store::JsonStore;

/// Main application state
pub struct AppState {
    pub store: Arc<JsonStore>,
    pub bus: EventBus,
    pub activity: Arc<ActivityLogger>,
    pub proxy: Arc<ProxyManager>,
    pub runtime: Arc<RuntimeManager>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Wire every component against the production command runner
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);
        let supervisor: Arc<dyn ProcessSupervisor> = Arc::new(Pm2Supervisor::new(
            runner.clone(),
            &options.settings.supervisor.bin,
            options.layout.process_logs_dir(),
        ));
        let proxy = Arc::new(ProxyManager::new(
            options.settings.proxy.clone(),
            options.server.port,
            options.layout.clone(),
            runner.clone(),
        ));
        Self::init_with(options, runner, supervisor, proxy).await
    }

    /// Wire every component around the given external collaborators
    pub async fn init_with(
        options: &AppOptions,
        runner: Arc<dyn CommandRunner>,
        supervisor: Arc<dyn ProcessSupervisor>,
        proxy: Arc<ProxyManager>,
    ) -> Result<Self, DeployError> {
        info!("Initializing application state...");
        let layout = &options.layout;
        let settings = &options.settings;

        layout.setup().await?;
        // leftovers from attempts interrupted by a crash
        if let Err(e) = layout.staging_root().delete().await {
            warn!("Failed to clear stale staging directories: {}", e);
        }
        layout.staging_root().create().await?;

        let store = Arc::new(JsonStore::open(layout.state_file()).await?);
        let bus = EventBus::new();
        let activity = Arc::new(ActivityLogger::new(store.clone(), bus.clone()));
        let ports = Arc::new(PortAllocator::new(store.clone(), &settings.ports)?);

        let connection =
            SupervisorConnection::new(supervisor, options.lifecycle.supervisor_settle_delay);
        let runtime = Arc::new(RuntimeManager::new(
            connection,
            proxy.clone(),
            store.clone(),
            store.clone(),
            bus.clone(),
            layout.clone(),
            settings.supervisor.clone(),
        ));

        let builder = Builder::new(
            runner,
            Duration::from_secs(settings.build.command_timeout_secs),
        );
        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            layout: layout.clone(),
            projects: store.clone(),
            deployments: store.clone(),
            env_source: store.clone(),
            ports,
            proxy: proxy.clone(),
            runtime: runtime.clone(),
            builder,
            activity: activity.clone(),
            bus: bus.clone(),
            health_timeout: runtime.health_timeout(),
        }));

        Ok(Self {
            store,
            bus,
            activity,
            proxy,
            runtime,
            orchestrator,
        })
    }

    /// State handed to the HTTP handlers
    pub fn server_state(&self) -> ServerState {
        ServerState::new(
            self.orchestrator.clone(),
            self.runtime.clone(),
            self.store.clone(),
            self.store.clone(),
            self.store.clone(),
            self.activity.clone(),
            self.bus.clone(),
        )
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), DeployError> {
        info!("Shutting down application state...");
        // every store mutation is already flushed; supervised processes keep running
        Ok(())
    }
}
