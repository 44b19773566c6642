//! Notification dispatch.
//!
//! The [`Dispatcher`] is the entry point of the engine. It owns the channel
//! registry and fans each published notification out over every channel:
//! effective setting, condition check, destinations, then one scheduled job
//! per destination.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use job_scheduler::{JobStore, SchedulerStats};

use crate::channels::{
    Channel, ChannelContext, ChannelRegistry, EmailChannel, MobilePushChannel,
};
use crate::config::DispatchConfig;
use crate::domain::{ChannelSetting, Notification, SendOptions};
use crate::integrations::IntegrationManager;
use crate::stores::{AppStore, DeliveryTracker, LogStore, UserStore};
use crate::templates::{ChannelTemplateStore, EmailTemplate, TemplateResolver};
use crate::utils::Clock;
use crate::{Error, Result};

/// External collaborators of the engine.
pub struct DispatchServices {
    pub apps: Arc<dyn AppStore>,
    pub users: Arc<dyn UserStore>,
    pub tracker: Arc<dyn DeliveryTracker>,
    pub logs: Arc<dyn LogStore>,
    pub integrations: IntegrationManager,
    pub email_templates: Arc<dyn ChannelTemplateStore<EmailTemplate>>,
    pub clock: Arc<dyn Clock>,
    /// Without a store, jobs still pending at shutdown end up failed.
    pub job_store: Option<Arc<dyn JobStore>>,
}

/// What happened on one channel during a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChannelDispatchOutcome {
    /// Jobs were scheduled for these destinations.
    Scheduled { configurations: Vec<String> },
    /// The effective setting disables the channel.
    NotSending,
    /// The channel's condition is already satisfied.
    ConditionMet,
    /// No destination for this user.
    NoConfiguration,
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelDispatch {
    pub channel: String,
    #[serde(flatten)]
    pub outcome: ChannelDispatchOutcome,
}

/// Per-channel result of a publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub channels: Vec<ChannelDispatch>,
}

impl DispatchSummary {
    pub fn get(&self, channel: &str) -> Option<&ChannelDispatchOutcome> {
        self.channels
            .iter()
            .find(|c| c.channel == channel)
            .map(|c| &c.outcome)
    }

    /// Number of jobs scheduled across all channels.
    pub fn scheduled(&self) -> usize {
        self.channels
            .iter()
            .map(|c| match &c.outcome {
                ChannelDispatchOutcome::Scheduled { configurations } => configurations.len(),
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    pub channel: String,
    #[serde(flatten)]
    pub scheduler: SchedulerStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub channels: Vec<ChannelStats>,
}

pub struct Dispatcher {
    registry: ChannelRegistry,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Build the dispatcher with the email and mobile push channels.
    pub fn new(config: &DispatchConfig, services: DispatchServices) -> Self {
        let ctx = ChannelContext {
            apps: services.apps.clone(),
            users: services.users,
            integrations: Arc::new(services.integrations),
            tracker: services.tracker,
            logs: services.logs,
            clock: services.clock,
            job_store: services.job_store,
        };

        let templates = TemplateResolver::new(
            services.apps,
            services.email_templates,
            config.default_language.clone(),
        );

        let mut registry = ChannelRegistry::new();
        registry.register(Channel::Email(Arc::new(EmailChannel::new(
            ctx.clone(),
            templates,
            config.scheduler.clone(),
        ))));
        registry.register(Channel::MobilePush(Arc::new(MobilePushChannel::new(
            ctx,
            config.scheduler.clone(),
            config.wakeup.clone(),
        ))));

        Self {
            registry,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Start every channel scheduler.
    pub fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock();
        for channel in self.registry.iter() {
            handles.push(channel.start()?);
        }
        info!(channels = self.registry.len(), "Dispatcher started");
        Ok(())
    }

    /// Publish a new notification on every channel.
    pub async fn publish(
        &self,
        notification: &Notification,
        options: &SendOptions,
        ct: &CancellationToken,
    ) -> Result<DispatchSummary> {
        self.dispatch(notification, options, ct).await
    }

    /// Publish a state change (seen, confirmed) of an existing notification.
    ///
    /// Channels that only deliver new content ignore updates.
    pub async fn publish_update(
        &self,
        notification: &Notification,
        options: &SendOptions,
        ct: &CancellationToken,
    ) -> Result<DispatchSummary> {
        let options = SendOptions {
            is_update: true,
            ..options.clone()
        };
        self.dispatch(notification, &options, ct).await
    }

    /// A device reported `notification` as seen.
    pub async fn handle_seen(
        &self,
        notification: &Notification,
        device_token: &str,
    ) -> Result<()> {
        for channel in self.registry.iter() {
            if let Channel::MobilePush(c) = channel {
                c.handle_seen(notification, device_token).await?;
            }
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        notification: &Notification,
        options: &SendOptions,
        ct: &CancellationToken,
    ) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();

        for channel in self.registry.iter() {
            if ct.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let outcome = self.dispatch_channel(channel, notification, options, ct).await;
            if let ChannelDispatchOutcome::Failed { error } = &outcome {
                warn!(
                    notification_id = %notification.id,
                    channel = channel.name(),
                    error = %error,
                    "Channel dispatch failed"
                );
            }

            summary.channels.push(ChannelDispatch {
                channel: channel.name().to_string(),
                outcome,
            });
        }

        debug!(
            notification_id = %notification.id,
            is_update = options.is_update,
            scheduled = summary.scheduled(),
            "Notification dispatched"
        );
        Ok(summary)
    }

    async fn dispatch_channel(
        &self,
        channel: &Channel,
        notification: &Notification,
        options: &SendOptions,
        ct: &CancellationToken,
    ) -> ChannelDispatchOutcome {
        let setting = effective_setting(channel.name(), notification, options);

        if !setting.is_sending() {
            return ChannelDispatchOutcome::NotSending;
        }
        if setting.is_condition_met(notification) {
            return ChannelDispatchOutcome::ConditionMet;
        }

        let configurations = channel.get_configurations(notification, &setting, options);
        if configurations.is_empty() {
            return ChannelDispatchOutcome::NoConfiguration;
        }

        let mut scheduled = Vec::with_capacity(configurations.len());
        let mut errors = Vec::new();

        for configuration in configurations {
            match channel
                .send(notification, &setting, &configuration, options, ct)
                .await
            {
                Ok(()) => scheduled.push(configuration),
                Err(e) => {
                    warn!(
                        notification_id = %notification.id,
                        channel = channel.name(),
                        configuration = %configuration,
                        error = %e,
                        "Failed to schedule delivery"
                    );
                    errors.push(e.to_string());
                }
            }
        }

        scheduled_outcome(scheduled, errors)
    }

    /// Stop every scheduler and wait for running deliveries.
    pub async fn shutdown(&self) {
        for channel in self.registry.iter() {
            channel.shutdown().await;
        }

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }

        info!("Dispatcher stopped");
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            channels: self
                .registry
                .iter()
                .map(|c| ChannelStats {
                    channel: c.name().to_string(),
                    scheduler: c.stats(),
                })
                .collect(),
        }
    }
}

/// Scheduled if at least one destination was scheduled.
fn scheduled_outcome(scheduled: Vec<String>, errors: Vec<String>) -> ChannelDispatchOutcome {
    if scheduled.is_empty() && !errors.is_empty() {
        ChannelDispatchOutcome::Failed {
            error: errors.join("; "),
        }
    } else {
        ChannelDispatchOutcome::Scheduled {
            configurations: scheduled,
        }
    }
}

/// User setting for the channel with the notification's override on top.
fn effective_setting(
    channel: &str,
    notification: &Notification,
    options: &SendOptions,
) -> ChannelSetting {
    let mut setting = options
        .user
        .settings
        .get(channel)
        .cloned()
        .unwrap_or_default();

    if let Some(overrides) = notification.channels.get(channel) {
        setting.merge(overrides);
    }
    setting
}
