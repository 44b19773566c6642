//! Provider integrations and sender resolution.
//!
//! Vendor clients live outside this crate. They plug in through
//! [`IntegrationProvider`], which turns an app's [`ConfiguredIntegration`]
//! into channel specific senders.

mod manager;

pub use manager::{IntegrationManager, SenderCapability};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::domain::{ConfiguredIntegration, MobileDeviceType, Notification};

/// What the channel should do about a permanently invalid destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalEffect {
    /// Remove the destination from the user profile.
    RemoveDestination,
    /// Stop using the channel for this user.
    DisableChannel,
}

/// Classified result of a single provider call.
///
/// Unclassified failures are reported as `Err` instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The provider refused this message; another provider may accept it.
    Rejected { reason: String },
    /// The destination will never accept messages again.
    DestinationInvalid {
        reason: String,
        effect: TerminalEffect,
    },
}

impl SendOutcome {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn destination_invalid(reason: impl Into<String>, effect: TerminalEffect) -> Self {
        Self::DestinationInvalid {
            reason: reason.into(),
            effect,
        }
    }
}

/// Common surface of all provider senders.
pub trait ProviderSender: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to_email: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
}

#[async_trait]
pub trait EmailSender: ProviderSender {
    async fn send(&self, message: &EmailMessage, ct: &CancellationToken) -> Result<SendOutcome>;
}

/// Per-device parameters of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobilePushOptions {
    pub device_type: MobileDeviceType,
    pub device_token: String,
    pub is_confirmed: bool,
    /// Silent background refresh without visible content.
    pub wakeup: bool,
}

#[async_trait]
pub trait MobilePushSender: ProviderSender {
    async fn send(
        &self,
        notification: &Notification,
        options: &MobilePushOptions,
        ct: &CancellationToken,
    ) -> Result<SendOutcome>;
}

/// Factory for the senders of one provider kind.
pub trait IntegrationProvider: Send + Sync {
    /// Matched against [`ConfiguredIntegration::kind`].
    fn kind(&self) -> &str;

    fn email_sender(&self, _integration: &ConfiguredIntegration) -> Option<Arc<dyn EmailSender>> {
        None
    }

    fn mobile_push_sender(
        &self,
        _integration: &ConfiguredIntegration,
    ) -> Option<Arc<dyn MobilePushSender>> {
        None
    }
}
