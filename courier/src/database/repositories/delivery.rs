//! Delivery tracker repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::Result;
use crate::database::models::DeliveryRecordDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::datetime_to_ms;
use crate::domain::{DeliveryRecord, Notification, ProcessStatus};
use crate::stores::DeliveryTracker;

/// SQLx implementation of [`DeliveryTracker`].
pub struct SqlxDeliveryTracker {
    pool: SqlitePool,
}

impl SqlxDeliveryTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Records of one user, most recently updated first.
    pub async fn list_for_user(
        &self,
        app_id: &str,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>> {
        let rows = sqlx::query_as::<_, DeliveryRecordDbModel>(
            r#"
            SELECT * FROM delivery_record
            WHERE app_id = ? AND user_id = ?
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(app_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeliveryRecord::try_from).collect()
    }
}

#[async_trait]
impl DeliveryTracker for SqlxDeliveryTracker {
    async fn is_handled(
        &self,
        notification_id: Uuid,
        channel: &str,
        configuration: &str,
    ) -> Result<bool> {
        Ok(self
            .get(notification_id, channel, configuration)
            .await?
            .is_some_and(|record| record.status.is_terminal()))
    }

    async fn collect_and_update(
        &self,
        notification: &Notification,
        channel: &str,
        configuration: &str,
        status: ProcessStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let notification_id = notification.id.to_string();
        let status = status.to_string();

        retry_on_sqlite_busy("update_delivery_record", || async {
            sqlx::query(
                r#"
                INSERT INTO delivery_record
                    (notification_id, app_id, user_id, channel, configuration,
                     status, reason, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (notification_id, channel, configuration) DO UPDATE SET
                    status = excluded.status,
                    reason = excluded.reason,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&notification_id)
            .bind(&notification.app_id)
            .bind(&notification.user_id)
            .bind(channel)
            .bind(configuration)
            .bind(&status)
            .bind(reason)
            .bind(datetime_to_ms(Utc::now()))
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        notification_id: Uuid,
        channel: &str,
        configuration: &str,
    ) -> Result<Option<DeliveryRecord>> {
        let row = sqlx::query_as::<_, DeliveryRecordDbModel>(
            r#"
            SELECT * FROM delivery_record
            WHERE notification_id = ? AND channel = ? AND configuration = ?
            "#,
        )
        .bind(notification_id.to_string())
        .bind(channel)
        .bind(configuration)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeliveryRecord::try_from).transpose()
    }
}
