//! Dependency install and build commands

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::errors::DeployError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::models::project::PackageManager;
use crate::storage::repos::EnvVars;

/// Lines of output kept in errors and deployment logs
const OUTPUT_TAIL: usize = 40;

/// Runs the package manager in a staging directory
pub struct Builder {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Builder {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Install every dependency, dev dependencies included
    pub async fn install(
        &self,
        dir: &Path,
        package_manager: PackageManager,
    ) -> Result<String, DeployError> {
        let spec = CommandSpec::new(package_manager.bin(), package_manager.install_args())
            .cwd(dir)
            // dev dependencies carry the build tooling
            .env("NODE_ENV", "development")
            .timeout(self.timeout);
        self.run_stage("Install", &spec).await
    }

    /// Run the manifest's build script with the project env injected
    pub async fn build(
        &self,
        dir: &Path,
        package_manager: PackageManager,
        env: &EnvVars,
    ) -> Result<String, DeployError> {
        let spec = CommandSpec::new(package_manager.bin(), package_manager.run_args("build"))
            .cwd(dir)
            .envs(env)
            .env("NODE_ENV", "production")
            .timeout(self.timeout);
        self.run_stage("Build", &spec).await
    }

    /// Returns the output tail for the deployment log
    async fn run_stage(&self, stage: &str, spec: &CommandSpec) -> Result<String, DeployError> {
        info!("{}: {}", stage, spec.display());
        let output: CommandOutput = self.runner.run(spec).await.map_err(|e| DeployError::Build {
            stage: stage.to_string(),
            exit_code: None,
            stderr: e.to_string(),
        })?;

        if !output.success() {
            return Err(DeployError::Build {
                stage: stage.to_string(),
                exit_code: output.exit_code,
                stderr: output.error_tail(OUTPUT_TAIL),
            });
        }

        let all: Vec<&str> = output.stdout.lines().collect();
        Ok(all[all.len().saturating_sub(OUTPUT_TAIL)..].join("\n"))
    }
}
