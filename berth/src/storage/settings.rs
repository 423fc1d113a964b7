//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;

/// Control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Local HTTP API
    #[serde(default)]
    pub server: ServerSettings,

    /// Reverse proxy (Caddy)
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Process supervisor (PM2)
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Port allocation range
    #[serde(default)]
    pub ports: PortSettings,

    /// Install/build commands
    #[serde(default)]
    pub build: BuildSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            server: ServerSettings::default(),
            proxy: ProxySettings::default(),
            supervisor: SupervisorSettings::default(),
            ports: PortSettings::default(),
            build: BuildSettings::default(),
        }
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3030
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Reverse proxy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Caddy binary
    #[serde(default = "default_caddy_bin")]
    pub bin: String,

    /// Master Caddyfile, regenerated on every change
    #[serde(default = "default_main_config")]
    pub main_config: PathBuf,

    /// Path-scoped project fragments, imported inside the main site
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,

    /// Domain-scoped project fragments, imported at top level
    #[serde(default = "default_domains_dir")]
    pub domains_dir: PathBuf,

    /// Caddy admin endpoint
    #[serde(default = "default_admin_url")]
    pub admin_url: String,

    /// systemd unit name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Prefix under which projects are reachable by path
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Built control-plane UI
    #[serde(default = "default_ui_dir")]
    pub ui_dir: PathBuf,

    /// Domains serving the control plane itself
    #[serde(default)]
    pub panel_domains: Vec<String>,

    #[serde(default = "default_validate_timeout")]
    pub validate_timeout_secs: u64,
}

fn default_caddy_bin() -> String {
    "caddy".to_string()
}

fn default_main_config() -> PathBuf {
    PathBuf::from("/etc/caddy/Caddyfile")
}

fn default_projects_dir() -> PathBuf {
    PathBuf::from("/etc/caddy/projects")
}

fn default_domains_dir() -> PathBuf {
    PathBuf::from("/etc/caddy/domains")
}

fn default_admin_url() -> String {
    "http://localhost:2019".to_string()
}

fn default_service_name() -> String {
    "caddy".to_string()
}

fn default_path_prefix() -> String {
    "/app".to_string()
}

fn default_ui_dir() -> PathBuf {
    PathBuf::from("/var/lib/berth/ui")
}

fn default_validate_timeout() -> u64 {
    20
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            bin: default_caddy_bin(),
            main_config: default_main_config(),
            projects_dir: default_projects_dir(),
            domains_dir: default_domains_dir(),
            admin_url: default_admin_url(),
            service_name: default_service_name(),
            path_prefix: default_path_prefix(),
            ui_dir: default_ui_dir(),
            panel_domains: Vec::new(),
            validate_timeout_secs: default_validate_timeout(),
        }
    }
}

/// Process supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// PM2 binary
    #[serde(default = "default_pm2_bin")]
    pub bin: String,

    /// Memory ceiling before the supervisor restarts a process
    #[serde(default = "default_max_memory")]
    pub max_memory: String,

    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    /// How long to wait for a started process to report online
    #[serde(default = "default_health_timeout")]
    pub health_timeout_secs: u64,
}

fn default_pm2_bin() -> String {
    "pm2".to_string()
}

fn default_max_memory() -> String {
    "512M".to_string()
}

fn default_max_restarts() -> u32 {
    10
}

fn default_restart_delay_ms() -> u64 {
    1000
}

fn default_health_timeout() -> u64 {
    30
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            bin: default_pm2_bin(),
            max_memory: default_max_memory(),
            max_restarts: default_max_restarts(),
            restart_delay_ms: default_restart_delay_ms(),
            health_timeout_secs: default_health_timeout(),
        }
    }
}

/// Port allocation range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    #[serde(default = "default_port_min")]
    pub min: u16,

    #[serde(default = "default_port_max")]
    pub max: u16,

    /// Random draws before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_port_min() -> u16 {
    10000
}

fn default_port_max() -> u16 {
    60000
}

fn default_max_attempts() -> u32 {
    100
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            min: default_port_min(),
            max: default_port_max(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Install/build command settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_command_timeout() -> u64 {
    900
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout(),
        }
    }
}
