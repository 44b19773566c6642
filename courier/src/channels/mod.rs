//! Delivery channels.
//!
//! Each channel resolves destinations for a notification, turns a send into a
//! scheduled job and delivers due jobs through its sender chain:
//! - Email (grouped per user, address and template)
//! - Mobile push (one job per device, plus silent iOS wakeups)

mod chain;
pub mod email;
pub mod mobile_push;

pub use email::{EmailChannel, EmailJob};
pub use mobile_push::{MobilePushChannel, MobilePushJob, WakeupPolicy};

use std::sync::Arc;

use job_scheduler::{JobStore, SchedulerStats};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::Result;
use crate::domain::{ChannelSetting, Notification, SendOptions};
use crate::integrations::IntegrationManager;
use crate::stores::{AppStore, DeliveryTracker, LogStore, UserStore};
use crate::utils::Clock;

/// Messages written to the app log.
pub(crate) mod texts {
    pub const USER_DELETED: &str = "User has been deleted.";
    pub const EMAIL_NO_ADDRESS: &str = "User has no email address.";
    pub const EMAIL_NO_SENDER: &str = "No email integration is configured for this app.";
    pub const EMAIL_DISABLED: &str =
        "Email address is invalid, email has been disabled for the user.";
    pub const PUSH_NO_SENDER: &str = "No mobile push integration is configured for this app.";
    pub const PUSH_TOKEN_UNKNOWN: &str = "Device token is no longer registered for the user.";
    pub const PUSH_TOKEN_REMOVED: &str = "Device token is invalid and has been removed.";
}

/// Collaborators shared by all channels.
#[derive(Clone)]
pub struct ChannelContext {
    pub apps: Arc<dyn AppStore>,
    pub users: Arc<dyn UserStore>,
    pub integrations: Arc<IntegrationManager>,
    pub tracker: Arc<dyn DeliveryTracker>,
    pub logs: Arc<dyn LogStore>,
    pub clock: Arc<dyn Clock>,
    /// Keeps channel schedulers' pending jobs across restarts.
    pub job_store: Option<Arc<dyn JobStore>>,
}

impl ChannelContext {
    /// Write to the app log. Failures are traced and otherwise ignored.
    pub(crate) async fn log(&self, app_id: &str, channel: &str, message: &str) {
        if let Err(e) = self.logs.log(app_id, channel, message).await {
            warn!(app_id = %app_id, channel = %channel, error = %e, "Failed to write app log");
        }
    }

    pub(crate) async fn update(
        &self,
        notification: &Notification,
        channel: &str,
        configuration: &str,
        status: crate::domain::ProcessStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        self.tracker
            .collect_and_update(notification, channel, configuration, status, reason)
            .await
    }

    /// Whether the triple already reached a terminal status.
    pub(crate) async fn is_terminal(
        &self,
        notification: &Notification,
        channel: &str,
        configuration: &str,
    ) -> bool {
        match self
            .tracker
            .get(notification.id, channel, configuration)
            .await
        {
            Ok(record) => record.is_some_and(|r| r.status.is_terminal()),
            Err(e) => {
                warn!(
                    notification_id = %notification.id,
                    channel = %channel,
                    error = %e,
                    "Failed to read delivery record"
                );
                false
            }
        }
    }
}

/// A registered channel.
#[derive(Clone)]
pub enum Channel {
    Email(Arc<EmailChannel>),
    MobilePush(Arc<MobilePushChannel>),
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Email(_) => email::NAME,
            Self::MobilePush(_) => mobile_push::NAME,
        }
    }

    /// Destinations the notification should be sent to on this channel.
    pub fn get_configurations(
        &self,
        notification: &Notification,
        setting: &ChannelSetting,
        options: &SendOptions,
    ) -> Vec<String> {
        match self {
            Self::Email(c) => c.get_configurations(notification, setting, options),
            Self::MobilePush(c) => c.get_configurations(notification, setting, options),
        }
    }

    /// Schedule delivery to one destination.
    pub async fn send(
        &self,
        notification: &Notification,
        setting: &ChannelSetting,
        configuration: &str,
        options: &SendOptions,
        ct: &CancellationToken,
    ) -> Result<()> {
        match self {
            Self::Email(c) => c.send(notification, setting, configuration, options, ct).await,
            Self::MobilePush(c) => c.send(notification, setting, configuration, options, ct).await,
        }
    }

    /// Start delivering due jobs.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let handle = match self {
            Self::Email(c) => c.scheduler().start(c.clone())?,
            Self::MobilePush(c) => c.scheduler().start(c.clone())?,
        };
        Ok(handle)
    }

    pub async fn shutdown(&self) {
        match self {
            Self::Email(c) => c.scheduler().shutdown().await,
            Self::MobilePush(c) => c.scheduler().shutdown().await,
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        match self {
            Self::Email(c) => c.scheduler().stats(),
            Self::MobilePush(c) => c.scheduler().stats(),
        }
    }
}

/// Channels by name, in registration order.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Vec<Channel>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel, replacing one with the same name.
    pub fn register(&mut self, channel: Channel) {
        self.channels.retain(|c| c.name() != channel.name());
        self.channels.push(channel);
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.iter().find(|c| c.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
