//! Activity logger

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::events::bus::{ControlEvent, EventBus};
use crate::models::activity::{Activity, ActivityKind};
use crate::storage::repos::ActivityRepository;

/// Fire-and-forget activity log
pub struct ActivityLogger {
    repo: Arc<dyn ActivityRepository>,
    bus: EventBus,
}

impl ActivityLogger {
    pub fn new(repo: Arc<dyn ActivityRepository>, bus: EventBus) -> Self {
        Self { repo, bus }
    }

    /// Record an entry. Failures are logged and never propagated.
    pub async fn log(
        &self,
        kind: ActivityKind,
        project_name: &str,
        message: &str,
        deployment_id: Option<&str>,
    ) {
        let activity = Activity {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            project_name: project_name.to_string(),
            message: message.to_string(),
            deployment_id: deployment_id.map(str::to_string),
            created_at: Utc::now(),
        };

        if let Err(e) = self.repo.append(&activity).await {
            warn!("Failed to record activity for {}: {}", project_name, e);
            return;
        }
        self.bus.publish(ControlEvent::ActivityNew(activity));
    }
}
