//! Port allocator
//!
//! Ports are drawn uniformly at random from the configured range and checked
//! against the persisted allocation table. At a few hundred services the
//! chance of 100 consecutive collisions is negligible; a saturated range
//! falls back to a linear scan before reporting exhaustion.

use std::collections::HashSet;
use std::sync::Arc;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::storage::repos::PortRepository;
use crate::storage::settings::PortSettings;

/// Hands out unique ports to services
pub struct PortAllocator {
    repo: Arc<dyn PortRepository>,
    min: u16,
    max: u16,
    max_attempts: u32,
}

impl PortAllocator {
    /// Fails when the configured range is empty
    pub fn new(
        repo: Arc<dyn PortRepository>,
        settings: &PortSettings,
    ) -> Result<Self, DeployError> {
        if settings.min > settings.max {
            return Err(DeployError::ConfigError(format!(
                "Port range is empty: min {} is above max {}",
                settings.min, settings.max
            )));
        }
        Ok(Self {
            repo,
            min: settings.min,
            max: settings.max,
            max_attempts: settings.max_attempts,
        })
    }

    /// Allocate a port for `service_id`, or return the one it already holds
    pub async fn allocate(&self, service_id: &str) -> Result<u16, DeployError> {
        if let Some(port) = self.repo.get_by_service(service_id).await? {
            debug!("Reusing port {} for {}", port, service_id);
            return Ok(port);
        }

        let allocated = self.repo.allocated_ports().await?;
        let port = self.pick(&allocated)?;
        self.repo.allocate(port, service_id).await?;

        info!("Allocated port {} for {}", port, service_id);
        Ok(port)
    }

    /// Release a port; it becomes eligible again immediately
    pub async fn release(&self, port: u16) -> Result<(), DeployError> {
        self.repo.release(port).await?;
        info!("Released port {}", port);
        Ok(())
    }

    pub async fn get_by_service(&self, service_id: &str) -> Result<Option<u16>, DeployError> {
        self.repo.get_by_service(service_id).await
    }

    fn pick(&self, allocated: &HashSet<u16>) -> Result<u16, DeployError> {
        let mut rng = rand::thread_rng();
        for _ in 0..self.max_attempts {
            let candidate = rng.gen_range(self.min..=self.max);
            if !allocated.contains(&candidate) {
                return Ok(candidate);
            }
        }

        warn!(
            "No free port after {} random draws, scanning {}-{}",
            self.max_attempts, self.min, self.max
        );
        (self.min..=self.max)
            .find(|p| !allocated.contains(p))
            .ok_or_else(|| {
                DeployError::ResourceExhausted(format!(
                    "No free port in range {}-{}",
                    self.min, self.max
                ))
            })
    }
}
