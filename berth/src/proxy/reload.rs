//! Proxy reload protocol
//!
//! The config is validated offline first; an invalid config never reaches
//! the live proxy. Reload tiers are then tried in order until one succeeds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::{DeployError, TierFailure};
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::storage::settings::ProxySettings;

/// One way of getting the proxy to load the current config
#[async_trait]
pub trait ReloadTier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns a diagnostic detail on failure
    async fn attempt(&self) -> Result<(), String>;
}

fn describe_failure(output: &CommandOutput) -> String {
    format!(
        "exit code {}: {}",
        output
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
        output.error_tail(20)
    )
}

fn caddy_args(action: &str, config: &std::path::Path) -> Vec<String> {
    vec![
        action.to_string(),
        "--config".to_string(),
        config.display().to_string(),
        "--adapter".to_string(),
        "caddyfile".to_string(),
    ]
}

/// `caddy validate`, run before any tier
pub struct ConfigValidator {
    runner: Arc<dyn CommandRunner>,
    bin: String,
    main_config: PathBuf,
    timeout: Duration,
}

impl ConfigValidator {
    pub async fn validate(&self) -> Result<(), DeployError> {
        let spec = CommandSpec::new(&self.bin, caddy_args("validate", &self.main_config))
            .timeout(self.timeout);
        let output = self.runner.run(&spec).await?;
        if output.success() {
            Ok(())
        } else {
            Err(DeployError::InvalidProxyConfig(describe_failure(&output)))
        }
    }
}

/// Adapt the Caddyfile to JSON and push it to the admin API.
/// Graceful: open connections are kept.
pub struct AdminApiTier {
    runner: Arc<dyn CommandRunner>,
    http: reqwest::Client,
    bin: String,
    main_config: PathBuf,
    admin_url: String,
}

#[async_trait]
impl ReloadTier for AdminApiTier {
    fn name(&self) -> &'static str {
        "admin-api"
    }

    async fn attempt(&self) -> Result<(), String> {
        let spec = CommandSpec::new(&self.bin, caddy_args("adapt", &self.main_config));
        let output = self.runner.run(&spec).await.map_err(|e| e.to_string())?;
        if !output.success() {
            return Err(format!("caddy adapt failed, {}", describe_failure(&output)));
        }

        let url = format!("{}/load", self.admin_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .body(output.stdout)
            .send()
            .await
            .map_err(|e| format!("POST {} failed: {}", url, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(format!("POST {} returned {}: {}", url, status, body.trim()))
        }
    }
}

/// `systemctl reload <unit>`
pub struct ServiceManagerTier {
    runner: Arc<dyn CommandRunner>,
    service_name: String,
}

#[async_trait]
impl ReloadTier for ServiceManagerTier {
    fn name(&self) -> &'static str {
        "systemctl"
    }

    async fn attempt(&self) -> Result<(), String> {
        let spec = CommandSpec::new("systemctl", ["reload", self.service_name.as_str()]);
        let output = self.runner.run(&spec).await.map_err(|e| e.to_string())?;
        if output.success() {
            Ok(())
        } else {
            Err(describe_failure(&output))
        }
    }
}

/// `caddy reload`, may briefly interrupt connections
pub struct CliReloadTier {
    runner: Arc<dyn CommandRunner>,
    bin: String,
    main_config: PathBuf,
}

#[async_trait]
impl ReloadTier for CliReloadTier {
    fn name(&self) -> &'static str {
        "caddy-cli"
    }

    async fn attempt(&self) -> Result<(), String> {
        let spec = CommandSpec::new(&self.bin, caddy_args("reload", &self.main_config));
        let output = self.runner.run(&spec).await.map_err(|e| e.to_string())?;
        if output.success() {
            Ok(())
        } else {
            Err(describe_failure(&output))
        }
    }
}

/// Validates, then walks the tiers in order
pub struct ProxyReloader {
    validator: ConfigValidator,
    tiers: Vec<Box<dyn ReloadTier>>,
}

impl ProxyReloader {
    /// The standard tier order: admin API, service manager, CLI
    pub fn new(settings: &ProxySettings, runner: Arc<dyn CommandRunner>) -> Self {
        let validator = ConfigValidator {
            runner: runner.clone(),
            bin: settings.bin.clone(),
            main_config: settings.main_config.clone(),
            timeout: Duration::from_secs(settings.validate_timeout_secs),
        };

        let tiers: Vec<Box<dyn ReloadTier>> = vec![
            Box::new(AdminApiTier {
                runner: runner.clone(),
                http: reqwest::Client::builder()
                    .timeout(Duration::from_secs(10))
                    .build()
                    .unwrap_or_default(),
                bin: settings.bin.clone(),
                main_config: settings.main_config.clone(),
                admin_url: settings.admin_url.clone(),
            }),
            Box::new(ServiceManagerTier {
                runner: runner.clone(),
                service_name: settings.service_name.clone(),
            }),
            Box::new(CliReloadTier {
                runner,
                bin: settings.bin.clone(),
                main_config: settings.main_config.clone(),
            }),
        ];

        Self { validator, tiers }
    }

    /// Replace the tier list
    pub fn with_tiers(mut self, tiers: Vec<Box<dyn ReloadTier>>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn tier_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    /// Reload the proxy, returning the tier that succeeded
    pub async fn reload(&self) -> Result<&'static str, DeployError> {
        self.validator.validate().await?;

        let mut attempts = Vec::new();
        for tier in &self.tiers {
            match tier.attempt().await {
                Ok(()) => {
                    info!("Proxy reloaded via {}", tier.name());
                    return Ok(tier.name());
                }
                Err(detail) => {
                    warn!("Proxy reload via {} failed: {}", tier.name(), detail);
                    attempts.push(TierFailure {
                        tier: tier.name().to_string(),
                        detail,
                    });
                }
            }
        }

        Err(DeployError::ProxyReload { attempts })
    }
}
