//! Delivery bookkeeping records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of one (notification, channel, configuration) triple.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum ProcessStatus {
    Attempt,
    Handled,
    Skipped,
    Failed,
}

impl ProcessStatus {
    /// No further delivery attempts follow this status.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Attempt)
    }
}

/// Last written status of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub notification_id: Uuid,
    pub app_id: String,
    pub user_id: String,
    pub channel: String,
    pub configuration: String,
    pub status: ProcessStatus,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of an app's diagnostic log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub app_id: String,
    pub channel: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
