//! Mobile push channel.
//!
//! Every device gets its own job. iOS devices additionally get a silent
//! wakeup after a push so the app can refresh outside the user's quiet hours.

mod wakeup;

pub use wakeup::{WakeupPolicy, next_wakeup_time};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use job_scheduler::{ScheduleHandler, Scheduler, SchedulerConfig};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::chain::{self, ChainOutcome};
use super::{ChannelContext, texts};
use crate::domain::{
    App, ChannelSetting, MobileDeviceType, MobilePushToken, Notification, ProcessStatus,
    SendOptions, User,
};
use crate::integrations::{MobilePushOptions, MobilePushSender, TerminalEffect};
use crate::utils::schedule_key;
use crate::{Error, Result};

/// Channel name.
pub const NAME: &str = "mobile_push";

/// Scheduled push of one notification to one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobilePushJob {
    pub notification: Notification,
    pub device_token: String,
    pub device_type: MobileDeviceType,
    /// State update of an already published notification.
    pub is_update: bool,
    pub schedule_key: String,
    pub delay: Duration,
}

impl MobilePushJob {
    pub fn new(
        notification: &Notification,
        setting: Option<&ChannelSetting>,
        token: &MobilePushToken,
        is_update: bool,
    ) -> Self {
        let id = notification.id.to_string();
        let schedule_key = schedule_key(&[
            id.as_str(),
            token.token.as_str(),
            if is_update { "update" } else { "publish" },
        ]);

        Self {
            notification: notification.clone(),
            device_token: token.token.clone(),
            device_type: token.device_type,
            is_update,
            schedule_key,
            delay: setting.map(ChannelSetting::delay).unwrap_or_default(),
        }
    }

    /// Silent refresh carrying only app, user and language.
    pub fn wakeup(notification: &Notification, token: &MobilePushToken) -> Self {
        let dummy = Notification::wakeup(
            notification.app_id.clone(),
            notification.user_id.clone(),
            notification.user_language.clone(),
        );
        Self::new(&dummy, None, token, false)
    }

    pub fn is_wakeup(&self) -> bool {
        self.notification.is_wakeup()
    }

    /// Only initial publications of real notifications are tracked.
    fn is_tracked(&self) -> bool {
        !self.is_update && !self.is_wakeup()
    }
}

pub struct MobilePushChannel {
    ctx: ChannelContext,
    wakeup: WakeupPolicy,
    scheduler: Scheduler<MobilePushJob>,
}

impl MobilePushChannel {
    pub fn new(ctx: ChannelContext, config: SchedulerConfig, wakeup: WakeupPolicy) -> Self {
        let scheduler = Scheduler::with_store(NAME, config, ctx.job_store.clone());
        Self {
            ctx,
            wakeup,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Scheduler<MobilePushJob> {
        &self.scheduler
    }

    /// All registered device tokens, if the app has a push integration.
    pub fn get_configurations(
        &self,
        notification: &Notification,
        _setting: &ChannelSetting,
        options: &SendOptions,
    ) -> Vec<String> {
        if !self
            .ctx
            .integrations
            .is_configured::<dyn MobilePushSender>(&options.app, notification)
        {
            return Vec::new();
        }

        options
            .user
            .mobile_push_tokens
            .iter()
            .filter(|t| !t.token.trim().is_empty())
            .map(|t| t.token.clone())
            .collect()
    }

    /// Schedule a push to the device `configuration`.
    ///
    /// Updates fire immediately. iOS devices also get a wakeup scheduled.
    pub async fn send(
        &self,
        notification: &Notification,
        setting: &ChannelSetting,
        configuration: &str,
        options: &SendOptions,
        ct: &CancellationToken,
    ) -> Result<()> {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let Some(token) = options.user.find_token(configuration) else {
            return Ok(());
        };

        if token.device_type == MobileDeviceType::IOs {
            self.try_wakeup(notification, &options.user, token).await?;
        }

        let job = MobilePushJob::new(notification, Some(setting), token, options.is_update);
        let due = if options.is_update {
            self.ctx.clock.now()
        } else {
            due_after(self.ctx.clock.now(), job.delay)
        };

        self.scheduler
            .schedule(job.schedule_key.clone(), job, due, false)
            .await?;
        Ok(())
    }

    /// An iOS device reported `notification` as seen; schedule its next wakeup.
    pub async fn handle_seen(
        &self,
        notification: &Notification,
        device_token: &str,
    ) -> Result<()> {
        if device_token.trim().is_empty() {
            return Ok(());
        }

        let Some(user) = self
            .ctx
            .users
            .get_cached(&notification.app_id, &notification.user_id)
            .await?
        else {
            return Ok(());
        };

        let token = user
            .mobile_push_tokens
            .iter()
            .find(|t| t.token == device_token && t.device_type == MobileDeviceType::IOs);

        match token {
            Some(token) => self.try_wakeup(notification, &user, token).await,
            None => Ok(()),
        }
    }

    async fn try_wakeup(
        &self,
        notification: &Notification,
        user: &User,
        token: &MobilePushToken,
    ) -> Result<()> {
        let now = self.ctx.clock.now();
        let Some(next_wakeup) = next_wakeup_time(token, user, now, &self.wakeup) else {
            return Ok(());
        };

        let job = MobilePushJob::wakeup(notification, token);
        self.scheduler
            .schedule(job.schedule_key.clone(), job, next_wakeup, false)
            .await?;

        debug!(
            app_id = %notification.app_id,
            user_id = %notification.user_id,
            at = %next_wakeup,
            "Scheduled device wakeup"
        );

        if let Err(e) = self
            .ctx
            .users
            .update_mobile_wakeup_time(
                &notification.app_id,
                &notification.user_id,
                &token.token,
                next_wakeup,
            )
            .await
        {
            warn!(
                app_id = %notification.app_id,
                user_id = %notification.user_id,
                error = %e,
                "Failed to store device wakeup time"
            );
        }

        Ok(())
    }

    async fn handle_job(&self, job: &MobilePushJob, ct: &CancellationToken) -> Result<()> {
        if job.is_tracked()
            && self
                .ctx
                .tracker
                .is_handled(job.notification.id, NAME, &job.device_token)
                .await?
        {
            return self.update(job, ProcessStatus::Skipped, None).await;
        }

        self.update(job, ProcessStatus::Attempt, None).await?;

        let app_id = &job.notification.app_id;
        let Some(app) = self.ctx.apps.get_cached(app_id).await? else {
            warn!(app_id = %app_id, "Cannot send push: app not found");
            return self.update(job, ProcessStatus::Handled, None).await;
        };

        match self.send_to_device(&app, job, ct).await {
            Err(e) if e.is_domain() => {
                self.ctx.log(&app.id, NAME, &e.to_string()).await;
                Err(e)
            }
            result => result,
        }
    }

    async fn send_to_device(
        &self,
        app: &App,
        job: &MobilePushJob,
        ct: &CancellationToken,
    ) -> Result<()> {
        let notification = &job.notification;

        let Some(user) = self
            .ctx
            .users
            .get_cached(&app.id, &notification.user_id)
            .await?
        else {
            return self.skip(job, texts::USER_DELETED).await;
        };

        if user.find_token(&job.device_token).is_none() {
            return self.skip(job, texts::PUSH_TOKEN_UNKNOWN).await;
        }

        let senders = self
            .ctx
            .integrations
            .resolve::<dyn MobilePushSender>(app, notification);
        if senders.is_empty() {
            return self.skip(job, texts::PUSH_NO_SENDER).await;
        }

        let options = MobilePushOptions {
            device_type: job.device_type,
            device_token: job.device_token.clone(),
            is_confirmed: notification.is_confirmed,
            wakeup: notification.formatting.is_none(),
        };

        let options = &options;
        let outcome = chain::run(NAME, &app.id, &senders, &self.ctx, ct, |sender| async move {
            sender.send(notification, options, ct).await
        })
        .await?;

        if let ChainOutcome::Terminal {
            sender,
            reason,
            effect,
        } = outcome
        {
            debug!(
                app_id = %app.id,
                sender = %sender,
                reason = %reason,
                "Device token rejected permanently"
            );
            self.ctx.log(&app.id, NAME, texts::PUSH_TOKEN_REMOVED).await;
            self.remove_destination(app, job, effect).await;
        }

        self.update(job, ProcessStatus::Handled, None).await
    }

    /// Best effort: the send is complete either way.
    async fn remove_destination(&self, app: &App, job: &MobilePushJob, effect: TerminalEffect) {
        let user_id = &job.notification.user_id;
        let result = match effect {
            TerminalEffect::RemoveDestination => {
                self.ctx
                    .users
                    .remove_mobile_push_token(&app.id, user_id, &job.device_token)
                    .await
            }
            TerminalEffect::DisableChannel => {
                self.ctx.users.disable_channel(&app.id, user_id, NAME).await
            }
        };

        if let Err(e) = result {
            warn!(
                app_id = %app.id,
                user_id = %user_id,
                error = %e,
                "Failed to remove device token"
            );
        }
    }

    async fn skip(&self, job: &MobilePushJob, reason: &str) -> Result<()> {
        self.ctx.log(&job.notification.app_id, NAME, reason).await;
        self.update(job, ProcessStatus::Skipped, Some(reason)).await
    }

    async fn update(
        &self,
        job: &MobilePushJob,
        status: ProcessStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        if !job.is_tracked() {
            return Ok(());
        }
        self.ctx
            .update(&job.notification, NAME, &job.device_token, status, reason)
            .await
    }
}

fn due_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(now)
}

#[async_trait]
impl ScheduleHandler<MobilePushJob> for MobilePushChannel {
    async fn handle(
        &self,
        jobs: &[MobilePushJob],
        _is_last_attempt: bool,
        ct: &CancellationToken,
    ) -> anyhow::Result<bool> {
        for job in jobs {
            self.handle_job(job, ct).await?;
        }
        Ok(true)
    }

    async fn handle_exception(&self, jobs: &[MobilePushJob], error: &anyhow::Error) {
        let reason = error.to_string();
        for job in jobs.iter().filter(|job| job.is_tracked()) {
            if self
                .ctx
                .is_terminal(&job.notification, NAME, &job.device_token)
                .await
            {
                continue;
            }
            if let Err(e) = self.update(job, ProcessStatus::Failed, Some(&reason)).await {
                warn!(
                    notification_id = %job.notification.id,
                    error = %e,
                    "Failed to mark push as failed"
                );
            }
        }
    }
}
