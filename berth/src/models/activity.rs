//! Activity log models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of activity entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Deploy,
    Error,
    Start,
    Stop,
    Restart,
    Delete,
}

/// Entry in the activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,

    #[serde(rename = "type")]
    pub kind: ActivityKind,

    pub project_name: String,

    pub message: String,

    pub deployment_id: Option<String>,

    pub created_at: DateTime<Utc>,
}
