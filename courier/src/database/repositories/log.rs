//! App log repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::AppLogDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::datetime_to_ms;
use crate::domain::LogEntry;
use crate::stores::LogStore;

/// SQLx implementation of [`LogStore`].
pub struct SqlxLogStore {
    pool: SqlitePool,
}

impl SqlxLogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete entries older than `retention_days`. Returns the number removed.
    pub async fn cleanup_old_entries(&self, retention_days: i64) -> Result<u64> {
        let cutoff = datetime_to_ms(Utc::now() - chrono::Duration::days(retention_days));

        retry_on_sqlite_busy("cleanup_app_log", || async {
            let result = sqlx::query("DELETE FROM app_log WHERE created_at < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

#[async_trait]
impl LogStore for SqlxLogStore {
    async fn log(&self, app_id: &str, channel: &str, message: &str) -> Result<()> {
        retry_on_sqlite_busy("insert_app_log", || async {
            sqlx::query(
                "INSERT INTO app_log (app_id, channel, message, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(app_id)
            .bind(channel)
            .bind(message)
            .bind(datetime_to_ms(Utc::now()))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn entries(&self, app_id: &str, limit: usize) -> Result<Vec<LogEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, AppLogDbModel>(
            "SELECT * FROM app_log WHERE app_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(app_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().rev().map(LogEntry::from).collect())
    }
}
