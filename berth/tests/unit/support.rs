//! Shared fixtures for the unit test target

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use secrecy::ExposeSecret;
use tempfile::TempDir;

use berth::deploy::build::Builder;
use berth::deploy::{Orchestrator, OrchestratorDeps};
use berth::errors::DeployError;
use berth::events::{ActivityLogger, EventBus};
use berth::exec::{CommandOutput, CommandRunner, CommandSpec};
use berth::models::deployment::DeployRequest;
use berth::models::project::{DeploymentSource, ProjectType, UploadType};
use berth::ports::PortAllocator;
use berth::proxy::{ProxyManager, ProxyReloader, ReloadTier};
use berth::runtime::mock::MockSupervisor;
use berth::runtime::{RuntimeManager, SupervisorConnection};
use berth::storage::layout::StorageLayout;
use berth::storage::settings::{PortSettings, ProxySettings, SupervisorSettings};
use berth::storage::store::JsonStore;

// ================================ COMMANDS ======================================= //

/// Command runner answering from a script; unmatched commands succeed silently
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    calls: Mutex<Vec<String>>,
    envs: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every command line containing `pattern` with `output`
    pub fn on(&self, pattern: &str, output: CommandOutput) -> &Self {
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), output));
        self
    }

    pub fn fail(&self, pattern: &str, exit_code: i32, stderr: &str) -> &Self {
        self.on(
            pattern,
            CommandOutput {
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        )
    }

    /// Command lines run so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ran(&self, pattern: &str) -> bool {
        self.calls().iter().any(|c| c.contains(pattern))
    }

    /// Extra environment of the first command line containing `pattern`
    pub fn env_of(&self, pattern: &str) -> Option<BTreeMap<String, String>> {
        self.envs
            .lock()
            .unwrap()
            .iter()
            .find(|(line, _)| line.contains(pattern))
            .map(|(_, env)| env.clone())
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DeployError> {
        let line = spec.display();
        self.calls.lock().unwrap().push(line.clone());
        let env = spec
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.expose_secret().to_string()))
            .collect();
        self.envs.lock().unwrap().push((line.clone(), env));

        let rules = self.rules.lock().unwrap();
        let scripted = rules
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, output)| output.clone());
        Ok(scripted.unwrap_or(CommandOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }))
    }
}

/// Reload tier that counts attempts and succeeds or fails on demand
pub struct CountingTier {
    pub name: &'static str,
    pub succeed: bool,
    pub attempts: Arc<AtomicUsize>,
}

impl CountingTier {
    pub fn new(name: &'static str, succeed: bool) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name,
                succeed,
                attempts: attempts.clone(),
            },
            attempts,
        )
    }
}

#[async_trait]
impl ReloadTier for CountingTier {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn attempt(&self) -> Result<(), String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok(())
        } else {
            Err(format!("{} unavailable", self.name))
        }
    }
}

// ================================ ARCHIVES ======================================= //

/// Write a `.tar.gz` holding `files` and return its path
pub fn make_archive(dir: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let path = dir.join(name);
    let encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (file_path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, file_path, contents.as_bytes())
            .unwrap();
    }

    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap();
    path
}

pub const STATIC_SITE: &[(&str, &str)] = &[
    ("index.html", "<html><body>blog</body></html>"),
    ("style.css", "body { margin: 0 }"),
];

pub fn node_api(version: &str) -> Vec<(&'static str, String)> {
    vec![
        (
            "package.json",
            r#"{"name":"api","scripts":{"start":"node server.js"}}"#.to_string(),
        ),
        ("package-lock.json", "{}".to_string()),
        ("server.js", format!("// {}\nrequire('http').createServer().listen(process.env.PORT);", version)),
    ]
}

/// Node API that needs a build step before it can start
pub fn node_api_with_build() -> Vec<(&'static str, String)> {
    vec![
        (
            "package.json",
            r#"{"name":"api","scripts":{"build":"tsc","start":"node dist/server.js"}}"#
                .to_string(),
        ),
        ("package-lock.json", "{}".to_string()),
        ("src/server.ts", "export {}".to_string()),
    ]
}

pub fn owned<'a>(files: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    files.iter().map(|(p, c)| (*p, c.as_str())).collect()
}

pub fn request(archive: PathBuf, name: &str, project_type: ProjectType) -> DeployRequest {
    DeployRequest {
        archive_path: archive,
        name: name.to_string(),
        project_type,
        version: None,
        deployment_source: DeploymentSource::Cli,
        upload_type: UploadType::FullSource,
        domains: Vec::new(),
        env_injected_at_build: false,
    }
}

// ================================ HARNESS ======================================== //

pub fn proxy_settings(root: &Path) -> ProxySettings {
    ProxySettings {
        main_config: root.join("caddy").join("Caddyfile"),
        projects_dir: root.join("caddy").join("projects"),
        domains_dir: root.join("caddy").join("domains"),
        ui_dir: root.join("ui"),
        ..ProxySettings::default()
    }
}

/// Every component wired over a temp dir, with scripted external tools
pub struct Harness {
    pub tmp: TempDir,
    pub layout: StorageLayout,
    pub store: Arc<JsonStore>,
    pub runner: Arc<ScriptedRunner>,
    pub supervisor: Arc<MockSupervisor>,
    pub proxy: Arc<ProxyManager>,
    pub runtime: Arc<RuntimeManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub activity: Arc<ActivityLogger>,
    pub bus: EventBus,
    pub reloads: Arc<AtomicUsize>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with(ScriptedRunner::new(), MockSupervisor::new()).await
    }

    pub async fn with(runner: ScriptedRunner, supervisor: MockSupervisor) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(tmp.path().join("data"));
        layout.setup().await.unwrap();

        let runner = Arc::new(runner);
        let supervisor = Arc::new(supervisor);
        let store = Arc::new(JsonStore::open(layout.state_file()).await.unwrap());
        let bus = EventBus::new();

        let settings = proxy_settings(tmp.path());
        let (tier, reloads) = CountingTier::new("fake", true);
        let reloader = ProxyReloader::new(&settings, runner.clone()).with_tiers(vec![Box::new(tier)]);
        let proxy = Arc::new(ProxyManager::with_reloader(
            settings,
            3030,
            layout.clone(),
            reloader,
        ));

        let runtime = Arc::new(
            RuntimeManager::new(
                SupervisorConnection::new(supervisor.clone(), Duration::ZERO),
                proxy.clone(),
                store.clone(),
                store.clone(),
                bus.clone(),
                layout.clone(),
                SupervisorSettings::default(),
            )
            .with_poll_interval(Duration::from_millis(10)),
        );

        let ports = Arc::new(PortAllocator::new(
            store.clone(),
            &PortSettings {
                min: 20000,
                max: 20100,
                max_attempts: 50,
            },
        )
        .unwrap());
        let activity = Arc::new(ActivityLogger::new(store.clone(), bus.clone()));
        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            layout: layout.clone(),
            projects: store.clone(),
            deployments: store.clone(),
            env_source: store.clone(),
            ports,
            proxy: proxy.clone(),
            runtime: runtime.clone(),
            builder: Builder::new(runner.clone(), Duration::from_secs(30)),
            activity: activity.clone(),
            bus: bus.clone(),
            health_timeout: Duration::from_millis(500),
        }));

        Self {
            tmp,
            layout,
            store,
            runner,
            supervisor,
            proxy,
            runtime,
            orchestrator,
            activity,
            bus,
            reloads,
        }
    }

    /// Archive directory outside the data dir
    pub fn uploads(&self) -> PathBuf {
        let dir = self.tmp.path().join("incoming");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub fn archive(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        make_archive(&self.uploads(), name, files)
    }

    pub fn live_file(&self, project_id: &str, path: &str) -> Option<String> {
        fs::read_to_string(self.layout.project_dir(project_id).path().join(path)).ok()
    }

    pub fn fragment(&self, project_id: &str) -> PathBuf {
        self.proxy
            .settings()
            .projects_dir
            .join(format!("{}.caddy", project_id))
    }
}
