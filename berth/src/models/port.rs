//! Port allocation models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A port held by a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAllocation {
    pub port: u16,

    /// Owning service (the project id)
    pub service_id: String,

    pub allocated_at: DateTime<Utc>,
}
