//! Users and their delivery destinations.

use std::collections::HashMap;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::ChannelSetting;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum MobileDeviceType {
    Android,
    #[strum(serialize = "iOS")]
    #[serde(rename = "iOS")]
    IOs,
    #[default]
    Unknown,
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MobilePushToken {
    pub token: String,
    pub device_type: MobileDeviceType,
    /// When the device was last scheduled for a silent wakeup.
    pub last_wakeup: Option<DateTime<Utc>>,
}

impl MobilePushToken {
    pub fn new(token: impl Into<String>, device_type: MobileDeviceType) -> Self {
        Self {
            token: token.into(),
            device_type,
            last_wakeup: None,
        }
    }
}

/// Daily window, in the user's local time, during which pushes should not
/// wake the device. The window may wrap around midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub app_id: String,
    pub email_address: Option<String>,
    pub full_name: Option<String>,
    /// IANA time zone name.
    pub time_zone: Option<String>,
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub mobile_push_tokens: Vec<MobilePushToken>,
    /// Channel settings keyed by channel name.
    #[serde(default)]
    pub settings: HashMap<String, ChannelSetting>,
}

impl User {
    pub fn new(app_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            app_id: app_id.into(),
            email_address: None,
            full_name: None,
            time_zone: None,
            quiet_hours: None,
            mobile_push_tokens: Vec::new(),
            settings: HashMap::new(),
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email_address = Some(email.into());
        self
    }

    pub fn with_token(mut self, token: MobilePushToken) -> Self {
        self.mobile_push_tokens.push(token);
        self
    }

    /// Email address, if one is set and not blank.
    pub fn email(&self) -> Option<&str> {
        self.email_address
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    pub fn find_token(&self, token: &str) -> Option<&MobilePushToken> {
        self.mobile_push_tokens.iter().find(|t| t.token == token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_quiet_hours_same_day() {
        let quiet = QuietHours {
            start: time(12, 0),
            end: time(14, 0),
        };
        assert!(quiet.contains(time(13, 0)));
        assert!(!quiet.contains(time(14, 0)));
        assert!(!quiet.contains(time(11, 59)));
    }

    #[test]
    fn test_quiet_hours_over_midnight() {
        let quiet = QuietHours {
            start: time(22, 0),
            end: time(7, 0),
        };
        assert!(quiet.contains(time(23, 30)));
        assert!(quiet.contains(time(3, 0)));
        assert!(!quiet.contains(time(7, 0)));
        assert!(!quiet.contains(time(12, 0)));
    }

    #[test]
    fn test_blank_email_is_ignored() {
        let user = User::new("app", "user").with_email("   ");
        assert_eq!(user.email(), None);
    }

    #[test]
    fn test_device_type_names() {
        assert_eq!(MobileDeviceType::IOs.to_string(), "iOS");
        assert_eq!("iOS".parse::<MobileDeviceType>().unwrap(), MobileDeviceType::IOs);
    }
}
