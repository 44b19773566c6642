//! Per-channel delivery preferences.

use serde::{Deserialize, Serialize};

use super::Notification;

/// Whether a channel should be used.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum ChannelSend {
    /// Use the value from the next level down; resolves to `Send`.
    #[default]
    Inherit,
    Send,
    NotSending,
}

/// Precondition evaluated right before a channel is used.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum ChannelCondition {
    /// Use the value from the next level down; resolves to `Always`.
    #[default]
    Inherit,
    Always,
    IfNotSeen,
    IfNotConfirmed,
}

/// Delivery preference for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSetting {
    pub send: ChannelSend,
    pub condition: ChannelCondition,
    /// Delay before the channel fires.
    pub delay_in_seconds: Option<u32>,
    /// Template to use instead of the app's primary template.
    pub template: Option<String>,
}

impl ChannelSetting {
    /// A setting that always sends.
    pub fn send() -> Self {
        Self {
            send: ChannelSend::Send,
            ..Default::default()
        }
    }

    /// Overlay `overrides` on top of `self`. Inherited values keep the current one.
    pub fn merge(&mut self, overrides: &ChannelSetting) {
        if overrides.send != ChannelSend::Inherit {
            self.send = overrides.send;
        }
        if overrides.condition != ChannelCondition::Inherit {
            self.condition = overrides.condition;
        }
        if overrides.delay_in_seconds.is_some() {
            self.delay_in_seconds = overrides.delay_in_seconds;
        }
        if overrides.template.is_some() {
            self.template.clone_from(&overrides.template);
        }
    }

    pub fn is_sending(&self) -> bool {
        self.send != ChannelSend::NotSending
    }

    /// Whether the condition is already met, which makes sending pointless.
    pub fn is_condition_met(&self, notification: &Notification) -> bool {
        match self.condition {
            ChannelCondition::IfNotSeen => notification.is_seen,
            ChannelCondition::IfNotConfirmed => notification.is_confirmed,
            ChannelCondition::Always | ChannelCondition::Inherit => false,
        }
    }

    pub fn delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.delay_in_seconds.unwrap_or(0)))
    }
}
