//! Error types for the Berth control plane

use serde::Serialize;
use thiserror::Error;

/// A single failed proxy reload tier
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TierFailure {
    pub tier: String,
    pub detail: String,
}

impl std::fmt::Display for TierFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.tier, self.detail)
    }
}

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{stage} failed (exit code {exit_code:?}): {stderr}")]
    Build {
        stage: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Verification error: {0}")]
    Verification(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Proxy config is invalid: {0}")]
    InvalidProxyConfig(String),

    #[error("Proxy reload failed on every tier: {}", format_attempts(.attempts))]
    ProxyReload { attempts: Vec<TierFailure> },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Supervisor error: {0}")]
    Supervisor(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_attempts(attempts: &[TierFailure]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl DeployError {
    /// Stable machine-readable error code
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Validation(_) => "VALIDATION_ERROR",
            DeployError::Build { .. } => "BUILD_ERROR",
            DeployError::Verification(_) => "VERIFICATION_ERROR",
            DeployError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            DeployError::InvalidProxyConfig(_) => "PROXY_CONFIG_INVALID",
            DeployError::ProxyReload { .. } => "PROXY_RELOAD_FAILED",
            DeployError::NotFound(_) => "NOT_FOUND",
            DeployError::Archive(_) => "ARCHIVE_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether this is one of the failure kinds the pipeline expects
    pub fn is_expected(&self) -> bool {
        self.kind() != "INTERNAL_ERROR"
    }

    /// Message suitable for showing to an end user.
    ///
    /// Unexpected failures get a generic message; the detail is only logged.
    pub fn user_message(&self) -> String {
        match self {
            DeployError::Build {
                stage,
                exit_code,
                stderr,
            } => {
                let code = exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                format!("{} failed with exit code {}:\n{}", stage, code, stderr.trim())
            }
            DeployError::ProxyReload { .. } => {
                "The application was deployed but the reverse proxy could not be reloaded. \
                 It may not be reachable until the proxy is reloaded."
                    .to_string()
            }
            e if e.is_expected() => e.to_string(),
            _ => "Deployment failed due to an internal error. Check the server logs for details."
                .to_string(),
        }
    }

    /// HTTP status code for this error kind
    pub fn status_code(&self) -> u16 {
        match self {
            DeployError::Validation(_) | DeployError::Archive(_) => 400,
            DeployError::NotFound(_) => 404,
            DeployError::Build { .. } | DeployError::Verification(_) => 422,
            DeployError::ResourceExhausted(_) => 503,
            _ => 500,
        }
    }
}
