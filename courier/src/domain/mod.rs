//! Domain types consumed by the dispatch core.

pub mod app;
pub mod delivery;
pub mod notification;
pub mod settings;
pub mod user;

pub use app::{App, ConfiguredIntegration};
pub use delivery::{DeliveryRecord, LogEntry, ProcessStatus};
pub use notification::{Notification, NotificationFormatting, SendOptions};
pub use settings::{ChannelCondition, ChannelSend, ChannelSetting};
pub use user::{MobileDeviceType, MobilePushToken, QuietHours, User};
