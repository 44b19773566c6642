//! Scheduler implementation.
//!
//! Pending work lives in a map keyed by schedule key. A single dispatch loop
//! sleeps until the earliest due time (or until new work arrives), drains due
//! batches and runs each one on its own task. A lock table keyed by schedule
//! key keeps deliveries for the same key strictly sequential.
//!
//! With a [`JobStore`] every change to a pending batch is written through and
//! batches are removed once delivered, so work still pending at shutdown is
//! picked up again by the next scheduler with the same name.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::backoff::RetryPolicy;
use crate::error::{Result, SchedulerError};
use crate::handler::ScheduleHandler;
use crate::store::{JobStore, StoredBatch};

/// Default number of jobs after which a grouped batch is delivered early.
const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Upper bound for an idle dispatch loop sleep.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Stand-in for due times beyond what [`Instant`] can represent.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Configuration for a scheduler instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Grouped batches reaching this size become due immediately.
    pub max_batch_size: usize,
    /// Attempt budget and backoff.
    #[serde(flatten)]
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Batches (or single jobs) waiting to become due.
    pub pending_batches: usize,
    /// Jobs across all pending batches.
    pub pending_jobs: usize,
    /// Batches currently being delivered or waiting for a retry.
    pub in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchMode {
    Grouped,
    Single,
}

struct PendingBatch<T> {
    jobs: Vec<T>,
    due: Instant,
    due_at: DateTime<Utc>,
    mode: BatchMode,
    revision: i64,
}

struct DueBatch<T> {
    key: String,
    jobs: Vec<T>,
    revision: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Delivered, or given up on after the exception handler ran.
    Finished,
    /// Stopped by shutdown; the stored batch is left for the next run.
    Interrupted,
}

struct Inner<T> {
    name: String,
    config: SchedulerConfig,
    pending: Mutex<HashMap<String, PendingBatch<T>>>,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    wake: Notify,
    in_flight: AtomicUsize,
    started: AtomicBool,
    cancellation_token: CancellationToken,
    tasks: TaskTracker,
    store: Option<Arc<dyn JobStore>>,
    /// Held around every store write so a batch is saved before it is removed.
    store_lock: tokio::sync::Mutex<()>,
    restored: AtomicBool,
    revision: AtomicI64,
    handler: Mutex<Option<Arc<dyn ScheduleHandler<T>>>>,
}

/// Delayed, keyed job scheduler.
///
/// Cloning is cheap; all clones share the same queue.
pub struct Scheduler<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Scheduler<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Scheduler<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an in-memory scheduler. Nothing is delivered until
    /// [`Self::start`] is called.
    pub fn new(name: impl Into<String>, config: SchedulerConfig) -> Self {
        Self::with_store(name, config, None)
    }

    /// Create a scheduler whose pending batches are kept in `store`.
    pub fn with_store(
        name: impl Into<String>,
        config: SchedulerConfig,
        store: Option<Arc<dyn JobStore>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                pending: Mutex::new(HashMap::new()),
                key_locks: DashMap::new(),
                wake: Notify::new(),
                in_flight: AtomicUsize::new(0),
                started: AtomicBool::new(false),
                cancellation_token: CancellationToken::new(),
                tasks: TaskTracker::new(),
                store,
                store_lock: tokio::sync::Mutex::new(()),
                restored: AtomicBool::new(false),
                revision: AtomicI64::new(Utc::now().timestamp_micros()),
                handler: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn is_durable(&self) -> bool {
        self.inner.store.is_some()
    }

    /// Append `job` to the batch under `key`.
    ///
    /// A new batch becomes due after `delay`. With `cancel_existing`, a batch
    /// still pending under `key` is discarded first.
    pub async fn schedule_grouped(
        &self,
        key: impl Into<String>,
        job: T,
        delay: Duration,
        cancel_existing: bool,
    ) -> Result<()> {
        let key = self.accept_key(key.into())?;
        let _store_guard = self.inner.store_lock.lock().await;
        self.inner.restore().await?;

        let now = Instant::now();
        let now_utc = Utc::now();
        let revision = self.inner.next_revision();

        let snapshot = {
            let mut pending = self.inner.pending.lock();

            if cancel_existing && let Some(discarded) = pending.remove(&key) {
                debug!(
                    scheduler = %self.inner.name,
                    key = %key,
                    discarded = discarded.jobs.len(),
                    "Discarded pending batch"
                );
            }

            let batch = pending.entry(key.clone()).or_insert_with(|| PendingBatch {
                jobs: Vec::new(),
                due: instant_after(now, delay),
                due_at: due_after(now_utc, delay),
                mode: BatchMode::Grouped,
                revision,
            });
            batch.mode = BatchMode::Grouped;
            batch.revision = revision;
            batch.jobs.push(job);

            if batch.jobs.len() >= self.inner.config.max_batch_size {
                batch.due = now;
                batch.due_at = now_utc;
            }

            self.inner.snapshot(&key, batch)
        };

        self.inner.wake.notify_one();
        self.inner.save(snapshot).await;
        Ok(())
    }

    /// Schedule a single job under `key` at `due_at`.
    ///
    /// A job already pending under `key` is replaced. With `cancel_existing`
    /// the replacement fires at `due_at`; without it the earlier of the two
    /// due times is kept.
    pub async fn schedule(
        &self,
        key: impl Into<String>,
        job: T,
        due_at: DateTime<Utc>,
        cancel_existing: bool,
    ) -> Result<()> {
        let key = self.accept_key(key.into())?;
        let _store_guard = self.inner.store_lock.lock().await;
        self.inner.restore().await?;

        let mut due = instant_from_utc(due_at);
        let mut due_at = due_at;
        let revision = self.inner.next_revision();

        let snapshot = {
            let mut pending = self.inner.pending.lock();

            if let Some(previous) = pending.remove(&key) {
                if !cancel_existing && previous.due < due {
                    due = previous.due;
                    due_at = previous.due_at;
                }
                debug!(
                    scheduler = %self.inner.name,
                    key = %key,
                    previous_mode = ?previous.mode,
                    replaced = previous.jobs.len(),
                    "Replaced pending job"
                );
            }

            let batch = pending.entry(key.clone()).or_insert(PendingBatch {
                jobs: vec![job],
                due,
                due_at,
                mode: BatchMode::Single,
                revision,
            });

            self.inner.snapshot(&key, batch)
        };

        self.inner.wake.notify_one();
        self.inner.save(snapshot).await;
        Ok(())
    }

    /// Start the dispatch loop delivering due work to `handler`.
    pub fn start(&self, handler: Arc<dyn ScheduleHandler<T>>) -> Result<JoinHandle<()>> {
        if self.inner.cancellation_token.is_cancelled() {
            return Err(SchedulerError::ShutDown(self.inner.name.clone()));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyStarted(self.inner.name.clone()));
        }

        *self.inner.handler.lock() = Some(Arc::clone(&handler));

        let scheduler = self.clone();
        Ok(tokio::spawn(async move { scheduler.run(handler).await }))
    }

    /// Stop dispatching, cancel retries and wait for running deliveries.
    ///
    /// Durable schedulers leave pending batches in their store. Otherwise the
    /// handler's exception path runs for every batch that never became due.
    pub async fn shutdown(&self) {
        self.inner.cancellation_token.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        let abandoned: Vec<PendingBatch<T>> = self
            .inner
            .pending
            .lock()
            .drain()
            .map(|(_, batch)| batch)
            .collect();
        let jobs: usize = abandoned.iter().map(|b| b.jobs.len()).sum();

        if jobs > 0 {
            if self.is_durable() {
                info!(
                    scheduler = %self.inner.name,
                    pending = jobs,
                    "Pending jobs left in store"
                );
            } else {
                warn!(
                    scheduler = %self.inner.name,
                    abandoned = jobs,
                    "Scheduler stopped with pending jobs"
                );
                let handler = self.inner.handler.lock().clone();
                if let Some(handler) = handler {
                    let error =
                        anyhow::Error::new(SchedulerError::ShutDown(self.inner.name.clone()));
                    for batch in &abandoned {
                        handler.handle_exception(&batch.jobs, &error).await;
                    }
                }
            }
        }

        info!(scheduler = %self.inner.name, "Scheduler stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancellation_token.is_cancelled()
    }

    pub fn stats(&self) -> SchedulerStats {
        let pending = self.inner.pending.lock();
        SchedulerStats {
            pending_batches: pending.len(),
            pending_jobs: pending.values().map(|b| b.jobs.len()).sum(),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
        }
    }

    fn accept_key(&self, key: String) -> Result<String> {
        if self.inner.cancellation_token.is_cancelled() {
            return Err(SchedulerError::ShutDown(self.inner.name.clone()));
        }
        if key.trim().is_empty() {
            return Err(SchedulerError::InvalidKey(key));
        }
        Ok(key)
    }

    async fn run(self, handler: Arc<dyn ScheduleHandler<T>>) {
        info!(scheduler = %self.inner.name, "Scheduler started");

        {
            let _store_guard = self.inner.store_lock.lock().await;
            if let Err(e) = self.inner.restore().await {
                warn!(scheduler = %self.inner.name, error = %e, "Failed to restore pending jobs");
            }
        }

        loop {
            let deadline = self
                .dispatch_due(&handler)
                .unwrap_or_else(|| Instant::now() + IDLE_POLL_INTERVAL);

            tokio::select! {
                _ = self.inner.cancellation_token.cancelled() => break,
                _ = self.inner.wake.notified() => {},
                _ = sleep_until(deadline) => {},
            }
        }

        debug!(scheduler = %self.inner.name, "Dispatch loop shutting down");
    }

    /// Hand every due batch to its own task. Returns the next due time.
    fn dispatch_due(&self, handler: &Arc<dyn ScheduleHandler<T>>) -> Option<Instant> {
        let now = Instant::now();

        let (due, next_due) = {
            let mut pending = self.inner.pending.lock();
            let due_keys: Vec<String> = pending
                .iter()
                .filter(|(_, batch)| batch.due <= now)
                .map(|(key, _)| key.clone())
                .collect();

            let due: Vec<DueBatch<T>> = due_keys
                .into_iter()
                .filter_map(|key| {
                    pending.remove(&key).map(|batch| DueBatch {
                        key,
                        jobs: batch.jobs,
                        revision: batch.revision,
                    })
                })
                .collect();

            (due, pending.values().map(|batch| batch.due).min())
        };

        for batch in due {
            let inner = Arc::clone(&self.inner);
            let handler = Arc::clone(handler);
            self.inner.tasks.spawn(async move { inner.execute(batch, handler).await });
        }

        next_due
    }
}

impl<T> Inner<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn next_revision(&self) -> i64 {
        self.revision.fetch_add(1, Ordering::SeqCst)
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release_key_lock(&self, key: &str) {
        self.key_locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Stored form of `batch`, if there is a store to write it to.
    fn snapshot(&self, key: &str, batch: &PendingBatch<T>) -> Option<StoredBatch> {
        self.store.as_ref()?;

        match serde_json::to_string(&batch.jobs) {
            Ok(jobs) => Some(StoredBatch {
                key: key.to_string(),
                jobs,
                due_at: batch.due_at,
                grouped: batch.mode == BatchMode::Grouped,
                revision: batch.revision,
            }),
            Err(e) => {
                warn!(scheduler = %self.name, key = %key, error = %e, "Failed to serialize jobs");
                None
            }
        }
    }

    /// Write a snapshot. The caller holds `store_lock`.
    async fn save(&self, snapshot: Option<StoredBatch>) {
        let (Some(store), Some(batch)) = (&self.store, snapshot) else {
            return;
        };

        if let Err(e) = store.save(&self.name, &batch).await {
            warn!(
                scheduler = %self.name,
                key = %batch.key,
                error = %e,
                "Failed to store pending jobs"
            );
        }
    }

    /// Delete a stored batch. The caller holds `store_lock`.
    async fn remove_stored(&self, key: &str, revision: i64) {
        let Some(store) = &self.store else {
            return;
        };

        if let Err(e) = store.remove(&self.name, key, revision).await {
            warn!(scheduler = %self.name, key = %key, error = %e, "Failed to remove stored jobs");
        }
    }

    async fn forget(&self, key: &str, revision: i64) {
        if self.store.is_none() {
            return;
        }
        let _store_guard = self.store_lock.lock().await;
        self.remove_stored(key, revision).await;
    }

    /// Load stored batches once. The caller holds `store_lock`.
    async fn restore(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if self.restored.load(Ordering::SeqCst) {
            return Ok(());
        }

        let stored = store
            .load(&self.name)
            .await
            .map_err(|e| SchedulerError::Store(format!("{:#}", e)))?;

        let mut restored_jobs = 0;
        for batch in stored {
            let jobs = match serde_json::from_str::<Vec<T>>(&batch.jobs) {
                Ok(jobs) if !jobs.is_empty() => jobs,
                Ok(_) => {
                    self.remove_stored(&batch.key, batch.revision).await;
                    continue;
                }
                Err(e) => {
                    warn!(
                        scheduler = %self.name,
                        key = %batch.key,
                        error = %e,
                        "Dropping unreadable stored jobs"
                    );
                    self.remove_stored(&batch.key, batch.revision).await;
                    continue;
                }
            };

            self.revision.fetch_max(batch.revision.saturating_add(1), Ordering::SeqCst);
            restored_jobs += jobs.len();

            let mode = if batch.grouped {
                BatchMode::Grouped
            } else {
                BatchMode::Single
            };
            self.pending.lock().insert(
                batch.key,
                PendingBatch {
                    jobs,
                    due: instant_from_utc(batch.due_at),
                    due_at: batch.due_at,
                    mode,
                    revision: batch.revision,
                },
            );
        }

        self.restored.store(true, Ordering::SeqCst);

        if restored_jobs > 0 {
            info!(scheduler = %self.name, jobs = restored_jobs, "Restored pending jobs");
            self.wake.notify_one();
        }
        Ok(())
    }

    async fn execute(self: Arc<Self>, batch: DueBatch<T>, handler: Arc<dyn ScheduleHandler<T>>) {
        let DueBatch {
            key,
            jobs,
            revision,
        } = batch;

        let lock = self.key_lock(&key);
        let delivery = {
            let _guard = lock.lock().await;
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let delivery = self.deliver(&key, &jobs, handler.as_ref()).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            delivery
        };
        drop(lock);
        self.release_key_lock(&key);

        if delivery == Delivery::Finished {
            self.forget(&key, revision).await;
        }
    }

    async fn deliver(&self, key: &str, jobs: &[T], handler: &dyn ScheduleHandler<T>) -> Delivery {
        let policy = &self.config.retry;
        let mut attempt = 1;

        loop {
            let is_last_attempt = policy.is_last_attempt(attempt);

            let error = match handler
                .handle(jobs, is_last_attempt, &self.cancellation_token)
                .await
            {
                Ok(true) => {
                    debug!(
                        scheduler = %self.name,
                        key = %key,
                        jobs = jobs.len(),
                        attempt,
                        "Delivered scheduled jobs"
                    );
                    return Delivery::Finished;
                }
                Ok(false) => anyhow::anyhow!("handler reported an unsuccessful attempt"),
                Err(e) => e,
            };

            if is_last_attempt {
                warn!(
                    scheduler = %self.name,
                    key = %key,
                    attempts = attempt,
                    error = %error,
                    "Giving up on scheduled jobs"
                );
                handler.handle_exception(jobs, &error).await;
                return Delivery::Finished;
            }

            let delay = policy.delay_for(attempt - 1);
            debug!(
                scheduler = %self.name,
                key = %key,
                attempt,
                error = %error,
                "Delivery failed, retrying in {:?}",
                delay
            );

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    if self.store.is_some() {
                        info!(
                            scheduler = %self.name,
                            key = %key,
                            "Shutdown during retry backoff, jobs stay stored"
                        );
                        return Delivery::Interrupted;
                    }

                    warn!(
                        scheduler = %self.name,
                        key = %key,
                        attempts = attempt,
                        "Shutdown during retry backoff, giving up on scheduled jobs"
                    );
                    let error = error.context(SchedulerError::ShutDown(self.name.clone()));
                    handler.handle_exception(jobs, &error).await;
                    return Delivery::Finished;
                }
                _ = sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}

fn instant_from_utc(due_at: DateTime<Utc>) -> Instant {
    let now = Instant::now();
    match (due_at - Utc::now()).to_std() {
        Ok(remaining) => instant_after(now, remaining),
        // Already due
        Err(_) => now,
    }
}

fn instant_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn due_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
