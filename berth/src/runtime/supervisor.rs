//! Process supervisor contract and connection handling

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::analyzer::ENTRY_CANDIDATES;
use crate::errors::DeployError;
use crate::models::project::PackageManager;
use crate::storage::repos::EnvVars;

/// State reported by the supervisor for one process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Online,
    Launching,
    Stopping,
    Stopped,
    Errored,
    Unknown,
}

impl ProcessState {
    pub fn parse(status: &str) -> Self {
        match status {
            "online" => ProcessState::Online,
            "launching" | "waiting restart" => ProcessState::Launching,
            "stopping" => ProcessState::Stopping,
            "stopped" => ProcessState::Stopped,
            "errored" => ProcessState::Errored,
            _ => ProcessState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Online => "online",
            ProcessState::Launching => "launching",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Errored => "errored",
            ProcessState::Unknown => "unknown",
        }
    }

    /// Counts as running for reconciliation
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Online | ProcessState::Launching)
    }
}

/// A process as listed by the supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisedProcess {
    pub name: String,
    pub pid: Option<u32>,
    pub status: ProcessState,
    pub uptime_ms: u64,
    pub cpu: f32,
    pub memory: u64,
}

/// How a process is launched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCommand {
    pub script: String,
    pub args: Vec<String>,
}

impl StartCommand {
    /// `<pm> run start` when the manifest has a start script, otherwise
    /// `node <entry>` for the manifest `main` or a conventional entry file.
    pub fn resolve(dir: &Path, package_manager: PackageManager) -> Option<Self> {
        let manifest: Option<Value> = std::fs::read_to_string(dir.join("package.json"))
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok());

        let has_start = manifest
            .as_ref()
            .and_then(|m| m.get("scripts"))
            .and_then(|s| s.get("start"))
            .and_then(|s| s.as_str())
            .map(|s| !s.trim().is_empty())
            .unwrap_or(false);
        if has_start {
            return Some(Self {
                script: package_manager.bin().to_string(),
                args: package_manager
                    .run_args("start")
                    .into_iter()
                    .map(str::to_string)
                    .collect(),
            });
        }

        let main = manifest
            .as_ref()
            .and_then(|m| m.get("main"))
            .and_then(|m| m.as_str())
            .map(str::to_string);
        main.into_iter()
            .chain(ENTRY_CANDIDATES.iter().map(|s| s.to_string()))
            .find(|entry| dir.join(entry).is_file())
            .map(|entry| Self {
                script: "node".to_string(),
                args: vec![entry],
            })
    }
}

/// Everything the supervisor needs to run a workload
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    pub name: String,
    pub cwd: PathBuf,
    pub command: StartCommand,
    /// Injected environment, port and project vars included
    pub env: EnvVars,
    pub out_file: PathBuf,
    pub error_file: PathBuf,
    pub max_memory_restart: String,
    pub max_restarts: u32,
    pub restart_delay_ms: u64,
}

impl ProcessDescriptor {
    /// PM2 ecosystem document. Contains secret values.
    pub fn to_ecosystem_json(&self) -> Value {
        let env: Map<String, Value> = self
            .env
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.expose_secret().to_string())))
            .collect();

        json!({
            "apps": [{
                "name": self.name,
                "cwd": self.cwd,
                "script": self.command.script,
                "args": self.command.args,
                "env": env,
                "out_file": self.out_file,
                "error_file": self.error_file,
                "merge_logs": true,
                "autorestart": true,
                "max_memory_restart": self.max_memory_restart,
                "max_restarts": self.max_restarts,
                "restart_delay": self.restart_delay_ms,
                "exp_backoff_restart_delay": 100,
            }]
        })
    }
}

/// External process supervisor
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn connect(&self) -> Result<(), DeployError>;

    async fn disconnect(&self) -> Result<(), DeployError>;

    async fn list(&self) -> Result<Vec<SupervisedProcess>, DeployError>;

    async fn start(&self, descriptor: &ProcessDescriptor) -> Result<(), DeployError>;

    async fn stop(&self, name: &str) -> Result<(), DeployError>;

    async fn restart(&self, name: &str) -> Result<(), DeployError>;

    /// Deleting an unknown process succeeds
    async fn delete(&self, name: &str) -> Result<(), DeployError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owns the supervisor connection. The only way in is [`with_session`],
/// which always disconnects afterwards, on error paths too.
///
/// [`with_session`]: SupervisorConnection::with_session
pub struct SupervisorConnection {
    supervisor: Arc<dyn ProcessSupervisor>,
    state: std::sync::Mutex<ConnectionState>,
    /// One session at a time
    session: Mutex<()>,
    settle_delay: Duration,
}

impl SupervisorConnection {
    pub fn new(supervisor: Arc<dyn ProcessSupervisor>, settle_delay: Duration) -> Self {
        Self {
            supervisor,
            state: std::sync::Mutex::new(ConnectionState::Disconnected),
            session: Mutex::new(()),
            settle_delay,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    /// Run `f` against a connected supervisor. Sessions must not nest.
    pub async fn with_session<T, F, Fut>(&self, f: F) -> Result<T, DeployError>
    where
        F: FnOnce(Arc<dyn ProcessSupervisor>) -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        let _session = self.session.lock().await;

        self.set_state(ConnectionState::Connecting);
        if let Err(e) = self.supervisor.connect().await {
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }
        self.set_state(ConnectionState::Connected);
        debug!("Supervisor connected");

        let result = f(self.supervisor.clone()).await;

        if let Err(e) = self.supervisor.disconnect().await {
            warn!("Supervisor disconnect failed: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);
        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        result
    }
}
