//! In-memory store implementations backed by `DashMap`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use uuid::Uuid;

use super::{AppStore, DeliveryTracker, LogStore, UserStore};
use crate::domain::{
    App, ChannelSend, DeliveryRecord, LogEntry, Notification, ProcessStatus, User,
};
use crate::{Error, Result};

/// Maximum number of log entries kept per app.
const MAX_LOG_ENTRIES_PER_APP: usize = 1000;

#[derive(Default)]
pub struct InMemoryAppStore {
    apps: DashMap<String, App>,
}

impl InMemoryAppStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, app: App) {
        self.apps.insert(app.id.clone(), app);
    }

    pub fn remove(&self, app_id: &str) {
        self.apps.remove(app_id);
    }
}

#[async_trait]
impl AppStore for InMemoryAppStore {
    async fn get_cached(&self, app_id: &str) -> Result<Option<App>> {
        Ok(self.apps.get(app_id).map(|app| app.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryUserStore {
    users: DashMap<(String, String), User>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users
            .insert((user.app_id.clone(), user.id.clone()), user);
    }

    pub fn remove(&self, app_id: &str, user_id: &str) {
        self.users
            .remove(&(app_id.to_string(), user_id.to_string()));
    }

    fn update<F>(&self, app_id: &str, user_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut User),
    {
        let mut user = self
            .users
            .get_mut(&(app_id.to_string(), user_id.to_string()))
            .ok_or_else(|| Error::not_found("User", user_id))?;
        f(user.value_mut());
        Ok(())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_cached(&self, app_id: &str, user_id: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .get(&(app_id.to_string(), user_id.to_string()))
            .map(|user| user.clone()))
    }

    async fn remove_mobile_push_token(
        &self,
        app_id: &str,
        user_id: &str,
        token: &str,
    ) -> Result<()> {
        self.update(app_id, user_id, |user| {
            user.mobile_push_tokens.retain(|t| t.token != token);
        })
    }

    async fn update_mobile_wakeup_time(
        &self,
        app_id: &str,
        user_id: &str,
        token: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.update(app_id, user_id, |user| {
            if let Some(t) = user
                .mobile_push_tokens
                .iter_mut()
                .find(|t| t.token == token)
            {
                t.last_wakeup = Some(timestamp);
            }
        })
    }

    async fn disable_channel(&self, app_id: &str, user_id: &str, channel: &str) -> Result<()> {
        self.update(app_id, user_id, |user| {
            user.settings.entry(channel.to_string()).or_default().send = ChannelSend::NotSending;
        })
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryTracker {
    records: DashMap<(Uuid, String, String), DeliveryRecord>,
}

impl InMemoryDeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn key(notification_id: Uuid, channel: &str, configuration: &str) -> (Uuid, String, String) {
        (notification_id, channel.to_string(), configuration.to_string())
    }
}

#[async_trait]
impl DeliveryTracker for InMemoryDeliveryTracker {
    async fn is_handled(
        &self,
        notification_id: Uuid,
        channel: &str,
        configuration: &str,
    ) -> Result<bool> {
        Ok(self
            .records
            .get(&Self::key(notification_id, channel, configuration))
            .is_some_and(|record| record.status.is_terminal()))
    }

    async fn collect_and_update(
        &self,
        notification: &Notification,
        channel: &str,
        configuration: &str,
        status: ProcessStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let record = DeliveryRecord {
            notification_id: notification.id,
            app_id: notification.app_id.clone(),
            user_id: notification.user_id.clone(),
            channel: channel.to_string(),
            configuration: configuration.to_string(),
            status,
            reason: reason.map(str::to_string),
            updated_at: Utc::now(),
        };
        self.records
            .insert(Self::key(notification.id, channel, configuration), record);
        Ok(())
    }

    async fn get(
        &self,
        notification_id: Uuid,
        channel: &str,
        configuration: &str,
    ) -> Result<Option<DeliveryRecord>> {
        Ok(self
            .records
            .get(&Self::key(notification_id, channel, configuration))
            .map(|record| record.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryLogStore {
    entries: DashMap<String, RwLock<Vec<LogEntry>>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn log(&self, app_id: &str, channel: &str, message: &str) -> Result<()> {
        let entries = self.entries.entry(app_id.to_string()).or_default();
        let mut entries = entries.write();
        entries.push(LogEntry {
            app_id: app_id.to_string(),
            channel: channel.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        });
        if entries.len() > MAX_LOG_ENTRIES_PER_APP {
            let overflow = entries.len() - MAX_LOG_ENTRIES_PER_APP;
            entries.drain(..overflow);
        }
        Ok(())
    }

    async fn entries(&self, app_id: &str, limit: usize) -> Result<Vec<LogEntry>> {
        Ok(self
            .entries
            .get(app_id)
            .map(|entries| {
                let entries = entries.read();
                let skip = entries.len().saturating_sub(limit);
                entries[skip..].to_vec()
            })
            .unwrap_or_default())
    }
}
