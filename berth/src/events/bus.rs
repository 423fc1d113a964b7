//! Typed event bus

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::activity::Activity;

const CHANNEL_CAPACITY: usize = 256;

/// Events published by the core
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ControlEvent {
    #[serde(rename = "project:change")]
    ProjectChange { project_id: String },

    #[serde(rename = "process:change")]
    ProcessChange { project_id: String, status: String },

    #[serde(rename = "activity:new")]
    ActivityNew(Activity),
}

/// Broadcast bus; publishing with no subscribers is fine
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: ControlEvent) {
        trace!("Publishing {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
