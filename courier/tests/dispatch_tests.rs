//! End-to-end tests of the dispatch engine.
//!
//! Every test runs the real schedulers against in-memory stores and scripted
//! provider senders, with retry delays shortened to milliseconds.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use courier::channels::WakeupPolicy;
use courier::database::{self, SqlxJobStore};
use courier::dispatch::ChannelDispatchOutcome;
use courier::domain::{
    App, ChannelSend, ChannelSetting, ConfiguredIntegration, MobileDeviceType, MobilePushToken,
    Notification, NotificationFormatting, ProcessStatus, SendOptions, User,
};
use courier::integrations::{
    EmailMessage, EmailSender, IntegrationManager, IntegrationProvider, MobilePushOptions,
    MobilePushSender, ProviderSender, SendOutcome, TerminalEffect,
};
use courier::stores::{
    AppStore, DeliveryTracker, InMemoryAppStore, InMemoryDeliveryTracker, InMemoryLogStore,
    InMemoryUserStore, LogStore, UserStore,
};
use courier::templates::{ChannelTemplate, EmailTemplate, InMemoryTemplateStore};
use courier::utils::SystemClock;
use courier::{DispatchConfig, DispatchServices, Dispatcher, Error, Result};
use job_scheduler::{JobStore, RetryPolicy, SchedulerConfig};

const APP: &str = "app-1";
const USER: &str = "user-1";
const EMAIL: &str = "user@example.com";
const PROVIDER_KIND: &str = "scripted";

#[derive(Debug, Clone, Copy)]
enum Script {
    Deliver,
    Reject(&'static str),
    Invalid(TerminalEffect),
    Fail,
}

/// Records every call and answers according to its script.
struct ScriptedSender {
    name: String,
    script: Script,
    calls: AtomicUsize,
    emails: Mutex<Vec<EmailMessage>>,
    pushes: Mutex<Vec<MobilePushOptions>>,
}

impl ScriptedSender {
    fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            calls: AtomicUsize::new(0),
            emails: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn answer(&self) -> Result<SendOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Deliver => Ok(SendOutcome::Delivered),
            Script::Reject(reason) => Ok(SendOutcome::rejected(reason)),
            Script::Invalid(effect) => Ok(SendOutcome::destination_invalid("unregistered", effect)),
            Script::Fail => Err(Error::provider("connection reset")),
        }
    }
}

impl ProviderSender for ScriptedSender {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl EmailSender for ScriptedSender {
    async fn send(&self, message: &EmailMessage, _ct: &CancellationToken) -> Result<SendOutcome> {
        self.emails.lock().push(message.clone());
        self.answer()
    }
}

#[async_trait]
impl MobilePushSender for ScriptedSender {
    async fn send(
        &self,
        _notification: &Notification,
        options: &MobilePushOptions,
        _ct: &CancellationToken,
    ) -> Result<SendOutcome> {
        self.pushes.lock().push(options.clone());
        self.answer()
    }
}

/// Hands out the scripted sender registered under the integration id.
#[derive(Default)]
struct ScriptedProvider {
    senders: HashMap<String, Arc<ScriptedSender>>,
}

impl IntegrationProvider for ScriptedProvider {
    fn kind(&self) -> &str {
        PROVIDER_KIND
    }

    fn email_sender(&self, integration: &ConfiguredIntegration) -> Option<Arc<dyn EmailSender>> {
        self.senders
            .get(&integration.id)
            .map(|s| s.clone() as Arc<dyn EmailSender>)
    }

    fn mobile_push_sender(
        &self,
        integration: &ConfiguredIntegration,
    ) -> Option<Arc<dyn MobilePushSender>> {
        self.senders
            .get(&integration.id)
            .map(|s| s.clone() as Arc<dyn MobilePushSender>)
    }
}

struct Harness {
    dispatcher: Dispatcher,
    apps: Arc<InMemoryAppStore>,
    users: Arc<InMemoryUserStore>,
    tracker: Arc<InMemoryDeliveryTracker>,
    logs: Arc<InMemoryLogStore>,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_retry_delay_ms: 10,
        max_retry_delay_ms: 20,
    }
}

impl Harness {
    fn new(senders: &[Arc<ScriptedSender>], wakeup: WakeupPolicy) -> Self {
        Self::build(senders, wakeup, fast_retry(), None)
    }

    /// Senders are registered as integrations in the given order, so the
    /// first one has the highest priority.
    fn build(
        senders: &[Arc<ScriptedSender>],
        wakeup: WakeupPolicy,
        retry: RetryPolicy,
        job_store: Option<Arc<dyn JobStore>>,
    ) -> Self {
        let apps = Arc::new(InMemoryAppStore::new());
        let users = Arc::new(InMemoryUserStore::new());
        let tracker = Arc::new(InMemoryDeliveryTracker::new());
        let logs = Arc::new(InMemoryLogStore::new());
        let templates = Arc::new(InMemoryTemplateStore::new());

        let mut app = App::new(APP, "Acme", "en");
        for (priority, sender) in senders.iter().enumerate() {
            app = app.with_integration(ConfiguredIntegration::new(
                sender.name.clone(),
                PROVIDER_KIND,
                priority as i32,
            ));
        }
        apps.insert(app);

        templates.insert(
            APP,
            ChannelTemplate::new("default").primary().with_language(
                "en",
                EmailTemplate::new("{{app.name}}: {{notifications.[0].subject}}")
                    .with_text("{{#each notifications}}{{subject}};{{/each}}"),
            ),
        );
        templates.insert(
            APP,
            ChannelTemplate::new("welcome").with_language(
                "en",
                EmailTemplate::new("Welcome to {{app.name}}").with_text("Hello {{user.email}}"),
            ),
        );

        let provider = ScriptedProvider {
            senders: senders
                .iter()
                .map(|s| (s.name.clone(), s.clone()))
                .collect(),
        };

        let config = DispatchConfig {
            scheduler: SchedulerConfig {
                max_batch_size: 100,
                retry,
            },
            wakeup,
            ..DispatchConfig::default()
        };

        let dispatcher = Dispatcher::new(
            &config,
            DispatchServices {
                apps: apps.clone(),
                users: users.clone(),
                tracker: tracker.clone(),
                logs: logs.clone(),
                integrations: IntegrationManager::new().with_provider(Arc::new(provider)),
                email_templates: templates,
                clock: Arc::new(SystemClock),
                job_store,
            },
        );
        dispatcher.start().unwrap();

        Self {
            dispatcher,
            apps,
            users,
            tracker,
            logs,
        }
    }

    fn add_user(&self, user: User) {
        self.users.insert(user);
    }

    async fn options(&self) -> SendOptions {
        let app = self.apps.get_cached(APP).await.unwrap().unwrap();
        let user = self.users.get_cached(APP, USER).await.unwrap().unwrap();
        SendOptions::new(app, user)
    }

    async fn publish(&self, notification: &Notification) -> courier::DispatchSummary {
        let options = self.options().await;
        self.dispatcher
            .publish(notification, &options, &CancellationToken::new())
            .await
            .unwrap()
    }

    async fn status(&self, id: Uuid, channel: &str, configuration: &str) -> Option<ProcessStatus> {
        self.tracker
            .get(id, channel, configuration)
            .await
            .unwrap()
            .map(|r| r.status)
    }

    async fn wait_for_status(
        &self,
        id: Uuid,
        channel: &str,
        configuration: &str,
        status: ProcessStatus,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.status(id, channel, configuration).await != Some(status) {
            assert!(
                Instant::now() < deadline,
                "timed out waiting for {:?}, last status {:?}",
                status,
                self.status(id, channel, configuration).await
            );
            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn log_messages(&self) -> Vec<String> {
        self.logs
            .entries(APP, 100)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.message)
            .collect()
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        sleep(Duration::from_millis(10)).await;
    }
}

fn email_user() -> User {
    User::new(APP, USER).with_email(EMAIL)
}

fn push_user(device_type: MobileDeviceType) -> User {
    User::new(APP, USER).with_token(MobilePushToken::new("device-1", device_type))
}

fn with_email_delay(mut user: User, seconds: u32) -> User {
    user.settings.insert(
        "email".to_string(),
        ChannelSetting {
            delay_in_seconds: Some(seconds),
            ..ChannelSetting::send()
        },
    );
    user
}

fn notification(subject: &str) -> Notification {
    Notification::new(APP, USER, "en").with_formatting(NotificationFormatting {
        subject: subject.to_string(),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_handled_delivery_is_not_sent_twice() {
    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Handled)
        .await;

    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Skipped)
        .await;

    assert_eq!(sender.calls(), 1);
}

#[tokio::test]
async fn test_rejected_sender_falls_back_to_next() {
    let primary = ScriptedSender::new("primary", Script::Reject("quota exceeded"));
    let backup = ScriptedSender::new("backup", Script::Deliver);
    let harness = Harness::new(&[primary.clone(), backup.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Handled)
        .await;

    assert_eq!(primary.calls(), 1);
    assert_eq!(backup.calls(), 1);

    let logs = harness.log_messages().await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("primary"));
    assert!(logs[0].contains("quota exceeded"));
}

#[tokio::test]
async fn test_exhausted_chain_retries_then_fails() {
    let primary = ScriptedSender::new("primary", Script::Reject("quota exceeded"));
    let backup = ScriptedSender::new("backup", Script::Fail);
    let harness = Harness::new(&[primary.clone(), backup.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Failed)
        .await;

    assert_eq!(primary.calls(), 3);
    assert_eq!(backup.calls(), 3);

    let record = harness
        .tracker
        .get(notification.id, "email", EMAIL)
        .await
        .unwrap()
        .unwrap();
    assert!(record.reason.unwrap().contains("connection reset"));
}

#[tokio::test]
async fn test_single_failing_sender_retries_then_fails() {
    let sender = ScriptedSender::new("smtp", Script::Fail);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Failed)
        .await;

    assert_eq!(sender.calls(), 3);
}

#[tokio::test]
async fn test_emails_within_delay_are_grouped() {
    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());

    harness.add_user(with_email_delay(email_user(), 1));

    let notifications = [notification("First"), notification("Second"), notification("Third")];
    for n in &notifications {
        harness.publish(n).await;
    }

    for n in &notifications {
        harness
            .wait_for_status(n.id, "email", EMAIL, ProcessStatus::Handled)
            .await;
    }

    assert_eq!(sender.calls(), 1);
    let emails = sender.emails.lock();
    assert_eq!(emails[0].subject, "Acme: First");
    assert_eq!(emails[0].body_text.as_deref(), Some("First;Second;Third;"));
}

#[tokio::test]
async fn test_duplicate_publish_within_delay_is_sent_once() {
    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(with_email_delay(email_user(), 1));

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Handled)
        .await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(sender.calls(), 1);
    assert_eq!(sender.emails.lock()[0].body_text.as_deref(), Some("Invoice;"));
}

#[tokio::test]
async fn test_updates_are_pushed_but_not_tracked() {
    let sender = ScriptedSender::new("fcm", Script::Deliver);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(push_user(MobileDeviceType::Android).with_email(EMAIL));

    let mut notification = notification("Invoice");
    notification.is_seen = true;
    let options = harness.options().await;
    harness
        .dispatcher
        .publish_update(&notification, &options, &CancellationToken::new())
        .await
        .unwrap();

    wait_until("update push", || sender.calls() == 1).await;
    sleep(Duration::from_millis(50)).await;

    assert!(harness.tracker.is_empty());
    assert!(sender.emails.lock().is_empty());
    assert_eq!(sender.pushes.lock().len(), 1);
}

#[tokio::test]
async fn test_failed_update_is_not_tracked() {
    let sender = ScriptedSender::new("fcm", Script::Fail);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(push_user(MobileDeviceType::Android));

    let mut notification = notification("Invoice");
    notification.is_seen = true;
    let options = harness.options().await;
    harness
        .dispatcher
        .publish_update(&notification, &options, &CancellationToken::new())
        .await
        .unwrap();

    wait_until("update retries", || sender.calls() == 3).await;
    sleep(Duration::from_millis(50)).await;

    assert!(harness.tracker.is_empty());
}

#[tokio::test]
async fn test_template_falls_back_to_app_language() {
    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let mut notification = notification("Bienvenue").with_template("welcome");
    notification.user_language = "fr".to_string();
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Handled)
        .await;

    assert_eq!(sender.emails.lock()[0].subject, "Welcome to Acme");

    let logs = harness.log_messages().await;
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("'welcome'"));
    assert!(logs[0].contains("'fr'"));
}

#[tokio::test]
async fn test_missing_translation_skips_email() {
    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let notification = notification("Invoice").with_template("unknown");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Skipped)
        .await;

    assert_eq!(sender.calls(), 0);
    assert!(harness.log_messages().await[0].contains("'unknown' not found"));
}

#[tokio::test]
async fn test_ios_push_schedules_one_wakeup() {
    let sender = ScriptedSender::new("apns", Script::Deliver);
    let policy = WakeupPolicy {
        delay_secs: 0,
        min_interval_secs: 3600,
    };
    let harness = Harness::new(&[sender.clone()], policy);
    harness.add_user(push_user(MobileDeviceType::IOs));

    let first = notification("First");
    harness.publish(&first).await;
    wait_until("push and wakeup", || sender.calls() == 2).await;

    {
        let pushes = sender.pushes.lock();
        assert_eq!(pushes.iter().filter(|p| p.wakeup).count(), 1);
        assert_eq!(pushes.iter().filter(|p| !p.wakeup).count(), 1);
    }

    let user = harness.users.get_cached(APP, USER).await.unwrap().unwrap();
    assert!(user.mobile_push_tokens[0].last_wakeup.is_some());

    // The wakeup interval has not elapsed, so only the push goes out.
    let second = notification("Second");
    harness.publish(&second).await;
    harness
        .wait_for_status(second.id, "mobile_push", "device-1", ProcessStatus::Handled)
        .await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(sender.calls(), 3);
    assert_eq!(harness.tracker.len(), 2);
}

#[tokio::test]
async fn test_ios_wakeup_is_scheduled_when_push_fails() {
    let sender = ScriptedSender::new("apns", Script::Fail);
    let policy = WakeupPolicy {
        delay_secs: 0,
        min_interval_secs: 3600,
    };
    let harness = Harness::new(&[sender.clone()], policy);
    harness.add_user(push_user(MobileDeviceType::IOs));

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "mobile_push", "device-1", ProcessStatus::Failed)
        .await;

    wait_until("wakeup push", || sender.pushes.lock().iter().any(|p| p.wakeup)).await;
    let user = harness.users.get_cached(APP, USER).await.unwrap().unwrap();
    assert!(user.mobile_push_tokens[0].last_wakeup.is_some());
    assert_eq!(harness.tracker.len(), 1);
}

#[tokio::test]
async fn test_android_push_has_no_wakeup() {
    let sender = ScriptedSender::new("fcm", Script::Deliver);
    let policy = WakeupPolicy {
        delay_secs: 0,
        min_interval_secs: 0,
    };
    let harness = Harness::new(&[sender.clone()], policy);
    harness.add_user(push_user(MobileDeviceType::Android));

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "mobile_push", "device-1", ProcessStatus::Handled)
        .await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(sender.calls(), 1);
}

#[tokio::test]
async fn test_invalid_token_is_removed() {
    let sender = ScriptedSender::new("fcm", Script::Invalid(TerminalEffect::RemoveDestination));
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(push_user(MobileDeviceType::Android));

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "mobile_push", "device-1", ProcessStatus::Handled)
        .await;

    let user = harness.users.get_cached(APP, USER).await.unwrap().unwrap();
    assert!(user.mobile_push_tokens.is_empty());
    assert_eq!(sender.calls(), 1);
    assert!(
        harness
            .log_messages()
            .await
            .iter()
            .any(|m| m.contains("removed"))
    );
}

#[tokio::test]
async fn test_invalid_address_disables_email() {
    let sender = ScriptedSender::new("smtp", Script::Invalid(TerminalEffect::DisableChannel));
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Handled)
        .await;

    let user = harness.users.get_cached(APP, USER).await.unwrap().unwrap();
    assert_eq!(user.settings["email"].send, ChannelSend::NotSending);

    // The disabled channel is no longer dispatched.
    let summary = harness.publish(&Notification::new(APP, USER, "en")).await;
    assert_eq!(summary.get("email"), Some(&ChannelDispatchOutcome::NotSending));
}

#[tokio::test]
async fn test_unconfigured_app_has_no_destinations() {
    let harness = Harness::new(&[], WakeupPolicy::default());
    harness.add_user(push_user(MobileDeviceType::IOs).with_email(EMAIL));

    let summary = harness.publish(&notification("Invoice")).await;

    assert_eq!(summary.get("email"), Some(&ChannelDispatchOutcome::NoConfiguration));
    assert_eq!(summary.get("mobile_push"), Some(&ChannelDispatchOutcome::NoConfiguration));
    assert_eq!(summary.scheduled(), 0);
}

#[tokio::test]
async fn test_silent_notification_skips_email_only() {
    let sender = ScriptedSender::new("both", Script::Deliver);
    let harness = Harness::new(&[sender], WakeupPolicy::default());
    harness.add_user(push_user(MobileDeviceType::Android).with_email(EMAIL));

    let mut notification = notification("Invoice");
    notification.silent = true;
    let summary = harness.publish(&notification).await;

    assert_eq!(summary.get("email"), Some(&ChannelDispatchOutcome::NoConfiguration));
    assert_eq!(
        summary.get("mobile_push"),
        Some(&ChannelDispatchOutcome::Scheduled {
            configurations: vec!["device-1".to_string()]
        })
    );
}

#[tokio::test]
async fn test_deleted_app_marks_handled() {
    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let mut notification = notification("Invoice");
    notification.channels.insert(
        "email".to_string(),
        ChannelSetting {
            delay_in_seconds: Some(1),
            ..Default::default()
        },
    );
    harness.publish(&notification).await;
    harness.apps.remove(APP);

    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Handled)
        .await;
    assert_eq!(sender.calls(), 0);
}

#[tokio::test]
async fn test_deleted_user_is_skipped() {
    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let harness = Harness::new(&[sender.clone()], WakeupPolicy::default());
    harness.add_user(email_user());

    let notification = notification("Invoice");
    let options = harness.options().await;
    harness.users.remove(APP, USER);

    harness
        .dispatcher
        .publish(&notification, &options, &CancellationToken::new())
        .await
        .unwrap();

    harness
        .wait_for_status(notification.id, "email", EMAIL, ProcessStatus::Skipped)
        .await;
    assert_eq!(sender.calls(), 0);
}

#[tokio::test]
async fn test_shutdown_stops_schedulers() {
    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let harness = Harness::new(&[sender], WakeupPolicy::default());
    harness.add_user(email_user());

    harness.dispatcher.shutdown().await;

    let summary = harness.publish(&notification("Invoice")).await;
    assert!(matches!(
        summary.get("email"),
        Some(ChannelDispatchOutcome::Failed { .. })
    ));
    assert!(harness.dispatcher.stats().channels.iter().all(|c| c.scheduler.in_flight == 0));
}

#[tokio::test]
async fn test_shutdown_during_backoff_marks_failed() {
    let sender = ScriptedSender::new("smtp", Script::Fail);
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_retry_delay_ms: 10_000,
        max_retry_delay_ms: 10_000,
    };
    let harness = Harness::build(&[sender.clone()], WakeupPolicy::default(), retry, None);
    harness.add_user(email_user());

    let notification = notification("Invoice");
    harness.publish(&notification).await;
    wait_until("first attempt", || sender.calls() == 1).await;

    harness.dispatcher.shutdown().await;

    assert_eq!(
        harness.status(notification.id, "email", EMAIL).await,
        Some(ProcessStatus::Failed)
    );
    assert_eq!(sender.calls(), 1);
}

#[tokio::test]
async fn test_pending_email_survives_restart() {
    let pool = database::init_pool("sqlite::memory:").await.unwrap();
    database::run_migrations(&pool).await.unwrap();
    let store: Arc<dyn JobStore> = Arc::new(SqlxJobStore::new(pool));

    let sender = ScriptedSender::new("smtp", Script::Deliver);
    let first = Harness::build(
        &[sender.clone()],
        WakeupPolicy::default(),
        fast_retry(),
        Some(store.clone()),
    );
    first.add_user(with_email_delay(email_user(), 3600));
    first.publish(&notification("Invoice")).await;
    first.dispatcher.shutdown().await;

    assert_eq!(store.load("email").await.unwrap().len(), 1);
    assert_eq!(sender.calls(), 0);

    let second = Harness::build(&[sender], WakeupPolicy::default(), fast_retry(), Some(store));
    wait_until("restored email batch", || {
        second
            .dispatcher
            .stats()
            .channels
            .iter()
            .any(|c| c.channel == "email" && c.scheduler.pending_jobs == 1)
    })
    .await;
}
