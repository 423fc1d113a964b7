//! Finite State Machine for a deployment attempt

use chrono::{DateTime, Utc};

use crate::errors::DeployError;
use crate::models::deployment::DeploymentStatus;

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Extraction done, install/build starting
    Build,

    /// Build verified, going live
    Deploy,

    /// Deployment completed successfully
    Succeed,

    /// Deployment failed
    Fail(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentStatus,
    error: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl DeploymentFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self {
            state: DeploymentStatus::Queued,
            error: None,
            completed_at: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentStatus {
        self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Set when a terminal state is reached
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, DeployError> {
        let new_state = match (self.state, &event) {
            (DeploymentStatus::Queued, DeploymentEvent::Build) => DeploymentStatus::Building,
            (DeploymentStatus::Building, DeploymentEvent::Deploy) => DeploymentStatus::Deploying,
            (DeploymentStatus::Deploying, DeploymentEvent::Succeed) => DeploymentStatus::Success,

            // failure is reachable from any non-terminal state
            (state, DeploymentEvent::Fail(err)) if !state.is_terminal() => {
                self.error = Some(err.clone());
                DeploymentStatus::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(DeployError::Internal(format!(
                    "Invalid deployment transition: {:?} -> {:?}",
                    state, event
                )));
            }
        };

        if new_state.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
