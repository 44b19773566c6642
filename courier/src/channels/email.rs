//! Email channel.
//!
//! Jobs for the same user, address and template are grouped, so a burst of
//! notifications within the delay window ends up in a single email.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use job_scheduler::{ScheduleHandler, Scheduler, SchedulerConfig};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::chain::{self, ChainOutcome};
use super::{ChannelContext, texts};
use crate::domain::{App, ChannelSetting, Notification, ProcessStatus, SendOptions};
use crate::integrations::{EmailSender, TerminalEffect};
use crate::templates::{EmailFormatter, EmailTemplate, TemplateResolveStatus, TemplateResolver};
use crate::utils::schedule_key;
use crate::{Error, Result};

/// Channel name.
pub const NAME: &str = "email";

/// Template label used in log messages when no template is named.
const PRIMARY_TEMPLATE: &str = "primary";

/// Scheduled delivery of one notification to one address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailJob {
    pub notification: Notification,
    pub email_address: String,
    pub email_template: Option<String>,
    pub schedule_key: String,
    pub delay: Duration,
}

impl EmailJob {
    pub fn new(
        notification: &Notification,
        setting: &ChannelSetting,
        email_address: &str,
    ) -> Self {
        let email_template = setting
            .template
            .clone()
            .or_else(|| notification.template.clone());

        let schedule_key = schedule_key(&[
            notification.app_id.as_str(),
            notification.user_id.as_str(),
            email_address,
            email_template.as_deref().unwrap_or_default(),
        ]);

        Self {
            notification: notification.clone(),
            email_address: email_address.to_string(),
            email_template,
            schedule_key,
            delay: setting.delay(),
        }
    }
}

pub struct EmailChannel {
    ctx: ChannelContext,
    templates: TemplateResolver<EmailTemplate>,
    formatter: EmailFormatter,
    scheduler: Scheduler<EmailJob>,
}

impl EmailChannel {
    pub fn new(
        ctx: ChannelContext,
        templates: TemplateResolver<EmailTemplate>,
        config: SchedulerConfig,
    ) -> Self {
        let scheduler = Scheduler::with_store(NAME, config, ctx.job_store.clone());
        Self {
            ctx,
            templates,
            formatter: EmailFormatter::new(),
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &Scheduler<EmailJob> {
        &self.scheduler
    }

    /// The user's address, unless the notification is silent or the app has
    /// no email integration.
    pub fn get_configurations(
        &self,
        notification: &Notification,
        _setting: &ChannelSetting,
        options: &SendOptions,
    ) -> Vec<String> {
        if notification.silent {
            return Vec::new();
        }

        if !self
            .ctx
            .integrations
            .is_configured::<dyn EmailSender>(&options.app, notification)
        {
            return Vec::new();
        }

        options
            .user
            .email()
            .map(|email| vec![email.to_string()])
            .unwrap_or_default()
    }

    /// Add the notification to the pending email for `configuration`.
    ///
    /// Updates of already published notifications are not emailed.
    pub async fn send(
        &self,
        notification: &Notification,
        setting: &ChannelSetting,
        configuration: &str,
        options: &SendOptions,
        ct: &CancellationToken,
    ) -> Result<()> {
        if options.is_update {
            return Ok(());
        }
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let job = EmailJob::new(notification, setting, configuration);
        let delay = job.delay;

        self.scheduler
            .schedule_grouped(job.schedule_key.clone(), job, delay, false)
            .await?;
        Ok(())
    }

    async fn handle_jobs(&self, jobs: &[EmailJob], ct: &CancellationToken) -> Result<()> {
        let mut unhandled = Vec::with_capacity(jobs.len());
        let mut seen = HashSet::with_capacity(jobs.len());

        for job in jobs {
            // The same notification published twice within the delay window.
            if !seen.insert((job.notification.id, job.email_address.as_str())) {
                debug!(
                    notification_id = %job.notification.id,
                    "Dropping duplicate email job from batch"
                );
                continue;
            }

            let handled = self
                .ctx
                .tracker
                .is_handled(job.notification.id, NAME, &job.email_address)
                .await?;

            if handled {
                self.update(job, ProcessStatus::Skipped, None).await?;
            } else {
                unhandled.push(job);
            }
        }

        if unhandled.is_empty() {
            return Ok(());
        }

        self.send_jobs(&unhandled, ct).await
    }

    async fn send_jobs(&self, jobs: &[&EmailJob], ct: &CancellationToken) -> Result<()> {
        self.update_all(jobs, ProcessStatus::Attempt, None).await?;

        let app_id = &jobs[0].notification.app_id;
        let Some(app) = self.ctx.apps.get_cached(app_id).await? else {
            warn!(app_id = %app_id, "Cannot send email: app not found");
            return self.update_all(jobs, ProcessStatus::Handled, None).await;
        };

        match self.send_to_user(&app, jobs, ct).await {
            Err(e) if e.is_domain() => {
                self.ctx.log(&app.id, NAME, &e.to_string()).await;
                Err(e)
            }
            result => result,
        }
    }

    async fn send_to_user(
        &self,
        app: &App,
        jobs: &[&EmailJob],
        ct: &CancellationToken,
    ) -> Result<()> {
        let first = jobs[0];
        let notification = &first.notification;

        let Some(user) = self
            .ctx
            .users
            .get_cached(&app.id, &notification.user_id)
            .await?
        else {
            return self.skip(jobs, texts::USER_DELETED).await;
        };

        if user.email().is_none() {
            return self.skip(jobs, texts::EMAIL_NO_ADDRESS).await;
        }

        let senders = self
            .ctx
            .integrations
            .resolve::<dyn EmailSender>(app, notification);
        if senders.is_empty() {
            return self.skip(jobs, texts::EMAIL_NO_SENDER).await;
        }

        let template_name = first.email_template.as_deref();
        let label = template_name.unwrap_or(PRIMARY_TEMPLATE);
        let language = &notification.user_language;

        let resolution = self
            .templates
            .get_best(&app.id, template_name, language)
            .await?;
        let status = resolution.status();

        let Some(template) = resolution.into_template() else {
            let reason = match status {
                TemplateResolveStatus::LanguageNotFound => format!(
                    "Email template '{}' has no translation for '{}' or the app language '{}'.",
                    label, language, app.language
                ),
                _ => format!("Email template '{}' not found.", label),
            };
            return self.skip(jobs, &reason).await;
        };

        if status == TemplateResolveStatus::ResolvedWithFallback {
            warn!(
                app_id = %app.id,
                template = %label,
                language = %language,
                "Email template translation missing, using app language"
            );
            self.ctx
                .log(
                    &app.id,
                    NAME,
                    &format!(
                        "Email template '{}' has no translation for '{}', using '{}'.",
                        label, language, app.language
                    ),
                )
                .await;
        }

        let notifications: Vec<&Notification> =
            jobs.iter().map(|job| &job.notification).collect();
        let message = self.formatter.format(
            &template,
            &notifications,
            app,
            &user,
            &first.email_address,
        )?;

        let message = &message;
        let outcome = chain::run(NAME, &app.id, &senders, &self.ctx, ct, |sender| async move {
            sender.send(message, ct).await
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
                effect = ?effect,
                "Email address rejected permanently"
            );
            self.ctx
                .log(&app.id, NAME, &format!("{} {}", texts::EMAIL_DISABLED, reason))
                .await;
            self.disable_for_user(app, &notification.user_id, effect).await;
        }

        self.update_all(jobs, ProcessStatus::Handled, None).await
    }

    /// Best effort: the send is complete either way.
    async fn disable_for_user(&self, app: &App, user_id: &str, effect: TerminalEffect) {
        match effect {
            TerminalEffect::RemoveDestination | TerminalEffect::DisableChannel => {
                if let Err(e) = self.ctx.users.disable_channel(&app.id, user_id, NAME).await {
                    warn!(
                        app_id = %app.id,
                        user_id = %user_id,
                        error = %e,
                        "Failed to disable email channel"
                    );
                }
            }
        }
    }

    async fn skip(&self, jobs: &[&EmailJob], reason: &str) -> Result<()> {
        self.ctx.log(&jobs[0].notification.app_id, NAME, reason).await;
        self.update_all(jobs, ProcessStatus::Skipped, Some(reason)).await
    }

    async fn update_all(
        &self,
        jobs: &[&EmailJob],
        status: ProcessStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        for job in jobs {
            self.update(job, status, reason).await?;
        }
        Ok(())
    }

    async fn update(
        &self,
        job: &EmailJob,
        status: ProcessStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        self.ctx
            .update(&job.notification, NAME, &job.email_address, status, reason)
            .await
    }
}

#[async_trait]
impl ScheduleHandler<EmailJob> for EmailChannel {
    async fn handle(
        &self,
        jobs: &[EmailJob],
        _is_last_attempt: bool,
        ct: &CancellationToken,
    ) -> anyhow::Result<bool> {
        self.handle_jobs(jobs, ct).await?;
        Ok(true)
    }

    async fn handle_exception(&self, jobs: &[EmailJob], error: &anyhow::Error) {
        let reason = error.to_string();
        for job in jobs {
            if self
                .ctx
                .is_terminal(&job.notification, NAME, &job.email_address)
                .await
            {
                continue;
            }
            if let Err(e) = self.update(job, ProcessStatus::Failed, Some(&reason)).await {
                warn!(
                    notification_id = %job.notification.id,
                    error = %e,
                    "Failed to mark email as failed"
                );
            }
        }
    }
}
