//! PM2-backed process supervisor

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::filesys::dir::Dir;
use crate::runtime::supervisor::{
    ProcessDescriptor, ProcessState, ProcessSupervisor, SupervisedProcess,
};

#[derive(Debug, Deserialize)]
struct Pm2Entry {
    name: String,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    pm2_env: Pm2Env,
    #[serde(default)]
    monit: Pm2Monit,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Env {
    #[serde(default)]
    status: String,
    /// Epoch millis of the last start
    #[serde(default)]
    pm_uptime: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Monit {
    #[serde(default)]
    cpu: f32,
    #[serde(default)]
    memory: u64,
}

impl Pm2Entry {
    fn into_process(self, now_ms: i64) -> SupervisedProcess {
        let status = ProcessState::parse(&self.pm2_env.status);
        let uptime_ms = match (status, self.pm2_env.pm_uptime) {
            (ProcessState::Online, Some(started)) => (now_ms - started).max(0) as u64,
            _ => 0,
        };
        SupervisedProcess {
            name: self.name,
            pid: self.pid.filter(|pid| *pid > 0),
            status,
            uptime_ms,
            cpu: self.monit.cpu,
            memory: self.monit.memory,
        }
    }
}

/// Parse `pm2 jlist` output. PM2 may print warnings, some of them starting
/// with `[PM2]`, before the JSON array, so every `[` is tried in turn.
pub fn parse_jlist(stdout: &str) -> Result<Vec<SupervisedProcess>, DeployError> {
    if stdout.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut first_error = None;
    for (start, _) in stdout.match_indices('[') {
        let mut stream =
            serde_json::Deserializer::from_str(&stdout[start..]).into_iter::<Vec<Pm2Entry>>();
        match stream.next() {
            Some(Ok(entries)) => {
                let now_ms = Utc::now().timestamp_millis();
                return Ok(entries.into_iter().map(|e| e.into_process(now_ms)).collect());
            }
            Some(Err(e)) => {
                first_error.get_or_insert(e);
            }
            None => {}
        }
    }

    Err(match first_error {
        Some(e) => e.into(),
        None => DeployError::Supervisor(format!(
            "Unexpected pm2 jlist output: {}",
            stdout.trim()
        )),
    })
}

fn is_not_found(output: &CommandOutput) -> bool {
    let text = format!("{}\n{}", output.stdout, output.stderr).to_lowercase();
    text.contains("not found") || text.contains("process or namespace")
}

/// Drives the `pm2` CLI through a [`CommandRunner`]
pub struct Pm2Supervisor {
    runner: Arc<dyn CommandRunner>,
    bin: String,
    /// Where ecosystem files are written before `pm2 start`
    descriptor_dir: Dir,
}

impl Pm2Supervisor {
    pub fn new(runner: Arc<dyn CommandRunner>, bin: &str, descriptor_dir: Dir) -> Self {
        Self {
            runner,
            bin: bin.to_string(),
            descriptor_dir,
        }
    }

    async fn pm2(&self, args: &[&str]) -> Result<CommandOutput, DeployError> {
        let spec = CommandSpec::new(&self.bin, args.iter().copied());
        self.runner.run(&spec).await
    }

    async fn pm2_checked(&self, args: &[&str]) -> Result<CommandOutput, DeployError> {
        let output = self.pm2(args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(DeployError::Supervisor(format!(
                "pm2 {} failed: {}",
                args.join(" "),
                output.error_tail(10)
            )))
        }
    }
}

#[async_trait]
impl ProcessSupervisor for Pm2Supervisor {
    async fn connect(&self) -> Result<(), DeployError> {
        // `ping` spawns the daemon when it is not running
        self.pm2_checked(&["ping"]).await.map(|_| ())
    }

    async fn disconnect(&self) -> Result<(), DeployError> {
        // each CLI call is its own connection
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SupervisedProcess>, DeployError> {
        let output = self.pm2_checked(&["jlist"]).await?;
        parse_jlist(&output.stdout)
    }

    async fn start(&self, descriptor: &ProcessDescriptor) -> Result<(), DeployError> {
        let file = self
            .descriptor_dir
            .file(&format!("{}.ecosystem.json", descriptor.name));
        file.write_json(&descriptor.to_ecosystem_json()).await?;
        file.set_permissions_600().await?;

        let path = file.path().display().to_string();
        let result = self.pm2_checked(&["start", path.as_str()]).await;

        // the daemon keeps its own copy of the env
        if let Err(e) = file.delete().await {
            debug!("Failed to remove {}: {}", path, e);
        }

        result?;
        info!("Started process {}", descriptor.name);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), DeployError> {
        self.pm2_checked(&["stop", name]).await.map(|_| ())
    }

    async fn restart(&self, name: &str) -> Result<(), DeployError> {
        self.pm2_checked(&["restart", name]).await.map(|_| ())
    }

    async fn delete(&self, name: &str) -> Result<(), DeployError> {
        let output = self.pm2(&["delete", name]).await?;
        if output.success() || is_not_found(&output) {
            Ok(())
        } else {
            Err(DeployError::Supervisor(format!(
                "pm2 delete {} failed: {}",
                name,
                output.error_tail(10)
            )))
        }
    }
}
