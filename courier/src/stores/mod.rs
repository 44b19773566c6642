//! Collaborator stores used by the channels.
//!
//! The dispatch core treats every store as a last-write-wins key-value
//! service. In-memory implementations live in [`memory`]; the SQLite backed
//! tracker and log sink live in [`crate::database::repositories`].

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::Result;
use crate::domain::{App, DeliveryRecord, LogEntry, Notification, ProcessStatus, User};

pub use memory::{InMemoryAppStore, InMemoryDeliveryTracker, InMemoryLogStore, InMemoryUserStore};

/// Read access to apps.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn get_cached(&self, app_id: &str) -> Result<Option<App>>;
}

/// Read and targeted write access to user profiles.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_cached(&self, app_id: &str, user_id: &str) -> Result<Option<User>>;

    /// Drop a device token that a provider reported as permanently invalid.
    async fn remove_mobile_push_token(
        &self,
        app_id: &str,
        user_id: &str,
        token: &str,
    ) -> Result<()>;

    /// Remember when the device was last scheduled for a silent wakeup.
    async fn update_mobile_wakeup_time(
        &self,
        app_id: &str,
        user_id: &str,
        token: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()>;

    /// Stop sending on `channel` for this user.
    async fn disable_channel(&self, app_id: &str, user_id: &str, channel: &str) -> Result<()>;
}

/// Delivery status per (notification, channel, configuration).
#[async_trait]
pub trait DeliveryTracker: Send + Sync {
    /// Whether the triple already reached a terminal status.
    async fn is_handled(
        &self,
        notification_id: Uuid,
        channel: &str,
        configuration: &str,
    ) -> Result<bool>;

    /// Record a status for the triple, overwriting the previous one.
    async fn collect_and_update(
        &self,
        notification: &Notification,
        channel: &str,
        configuration: &str,
        status: ProcessStatus,
        reason: Option<&str>,
    ) -> Result<()>;

    async fn get(
        &self,
        notification_id: Uuid,
        channel: &str,
        configuration: &str,
    ) -> Result<Option<DeliveryRecord>>;
}

/// Per-app diagnostic log.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn log(&self, app_id: &str, channel: &str, message: &str) -> Result<()>;

    /// Most recent entries for an app, newest last.
    async fn entries(&self, app_id: &str, limit: usize) -> Result<Vec<LogEntry>>;
}
