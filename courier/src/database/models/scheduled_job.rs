//! Scheduler persistence models.

use job_scheduler::StoredBatch;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::ms_to_datetime;

/// Row of `scheduled_job`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScheduledJobDbModel {
    pub scheduler: String,
    pub schedule_key: String,
    pub jobs: String,
    pub due_at: i64,
    pub grouped: bool,
    pub revision: i64,
}

impl From<ScheduledJobDbModel> for StoredBatch {
    fn from(row: ScheduledJobDbModel) -> Self {
        Self {
            key: row.schedule_key,
            jobs: row.jobs,
            due_at: ms_to_datetime(row.due_at),
            grouped: row.grouped,
            revision: row.revision,
        }
    }
}
