//! Scheduler job store repository.

use async_trait::async_trait;
use job_scheduler::{JobStore, StoredBatch};
use sqlx::SqlitePool;

use crate::database::models::ScheduledJobDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::datetime_to_ms;

/// SQLx implementation of [`JobStore`].
pub struct SqlxJobStore {
    pool: SqlitePool,
}

impl SqlxJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for SqlxJobStore {
    async fn save(&self, scheduler: &str, batch: &StoredBatch) -> anyhow::Result<()> {
        retry_on_sqlite_busy("save_scheduled_job", || async {
            sqlx::query(
                r#"
                INSERT INTO scheduled_job
                    (scheduler, schedule_key, jobs, due_at, grouped, revision)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT (scheduler, schedule_key) DO UPDATE SET
                    jobs = excluded.jobs,
                    due_at = excluded.due_at,
                    grouped = excluded.grouped,
                    revision = excluded.revision
                "#,
            )
            .bind(scheduler)
            .bind(&batch.key)
            .bind(&batch.jobs)
            .bind(datetime_to_ms(batch.due_at))
            .bind(batch.grouped)
            .bind(batch.revision)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn remove(&self, scheduler: &str, key: &str, revision: i64) -> anyhow::Result<()> {
        retry_on_sqlite_busy("remove_scheduled_job", || async {
            sqlx::query(
                r#"
                DELETE FROM scheduled_job
                WHERE scheduler = ? AND schedule_key = ? AND revision <= ?
                "#,
            )
            .bind(scheduler)
            .bind(key)
            .bind(revision)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn load(&self, scheduler: &str) -> anyhow::Result<Vec<StoredBatch>> {
        let rows = sqlx::query_as::<_, ScheduledJobDbModel>(
            "SELECT * FROM scheduled_job WHERE scheduler = ? ORDER BY due_at",
        )
        .bind(scheduler)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredBatch::from).collect())
    }
}
