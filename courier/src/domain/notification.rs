//! Notifications as seen by the dispatch core.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{App, ChannelSetting, User};

/// Content hints rendered by the channels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationFormatting {
    pub subject: String,
    pub body: Option<String>,
    pub link_url: Option<String>,
    pub link_text: Option<String>,
    pub image_small: Option<String>,
    pub image_large: Option<String>,
}

/// A notification addressed to a single user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub app_id: String,
    pub user_id: String,
    pub user_language: String,
    /// Explicit template name; the app's primary template when absent.
    pub template: Option<String>,
    /// Absent for silent wakeups.
    pub formatting: Option<NotificationFormatting>,
    pub silent: bool,
    /// Only test integrations may deliver test notifications.
    pub test: bool,
    pub is_seen: bool,
    pub is_confirmed: bool,
    /// Per-channel overrides on top of the user's settings.
    #[serde(default)]
    pub channels: HashMap<String, ChannelSetting>,
    pub created: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        user_language: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            app_id: app_id.into(),
            user_id: user_id.into(),
            user_language: user_language.into(),
            template: None,
            formatting: None,
            silent: false,
            test: false,
            is_seen: false,
            is_confirmed: false,
            channels: HashMap::new(),
            created: Utc::now(),
        }
    }

    /// Placeholder carried by silent wakeup jobs: nil id and no content.
    pub fn wakeup(
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        user_language: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            ..Self::new(app_id, user_id, user_language)
        }
    }

    pub fn with_formatting(mut self, formatting: NotificationFormatting) -> Self {
        self.formatting = Some(formatting);
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn is_wakeup(&self) -> bool {
        self.id.is_nil() && self.formatting.is_none()
    }
}

/// Context passed along with every send.
#[derive(Debug, Clone)]
pub struct SendOptions {
    pub app: App,
    pub user: User,
    /// A state update of an already published notification.
    pub is_update: bool,
}

impl SendOptions {
    pub fn new(app: App, user: User) -> Self {
        Self {
            app,
            user,
            is_update: false,
        }
    }
}
