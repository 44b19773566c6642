//! Persistence of pending batches.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// A pending batch as written to a [`JobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBatch {
    pub key: String,
    /// Jobs as a JSON array.
    pub jobs: String,
    pub due_at: DateTime<Utc>,
    pub grouped: bool,
    /// Increases with every change to the batch.
    pub revision: i64,
}

/// Durable storage for pending batches, keyed by scheduler name and schedule key.
#[async_trait]
pub trait JobStore: Send + Sync + 'static {
    /// Insert or replace the batch under `batch.key`.
    async fn save(&self, scheduler: &str, batch: &StoredBatch) -> anyhow::Result<()>;

    /// Delete the batch under `key` if its revision is at most `revision`.
    async fn remove(&self, scheduler: &str, key: &str, revision: i64) -> anyhow::Result<()>;

    /// All batches stored for `scheduler`.
    async fn load(&self, scheduler: &str) -> anyhow::Result<Vec<StoredBatch>>;
}

/// Process-local [`JobStore`], mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    batches: Mutex<HashMap<(String, String), StoredBatch>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.lock().is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save(&self, scheduler: &str, batch: &StoredBatch) -> anyhow::Result<()> {
        self.batches
            .lock()
            .insert((scheduler.to_string(), batch.key.clone()), batch.clone());
        Ok(())
    }

    async fn remove(&self, scheduler: &str, key: &str, revision: i64) -> anyhow::Result<()> {
        let mut batches = self.batches.lock();
        let id = (scheduler.to_string(), key.to_string());
        if batches.get(&id).is_some_and(|b| b.revision <= revision) {
            batches.remove(&id);
        }
        Ok(())
    }

    async fn load(&self, scheduler: &str) -> anyhow::Result<Vec<StoredBatch>> {
        Ok(self
            .batches
            .lock()
            .iter()
            .filter(|((name, _), _)| name == scheduler)
            .map(|(_, batch)| batch.clone())
            .collect())
    }
}
