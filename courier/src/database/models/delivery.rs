//! Delivery tracking database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::database::time::ms_to_datetime;
use crate::domain::{DeliveryRecord, LogEntry, ProcessStatus};
use crate::{Error, Result};

/// Row of `delivery_record`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DeliveryRecordDbModel {
    pub notification_id: String,
    pub app_id: String,
    pub user_id: String,
    pub channel: String,
    pub configuration: String,
    /// `ProcessStatus` in PascalCase.
    pub status: String,
    pub reason: Option<String>,
    pub updated_at: i64,
}

impl TryFrom<DeliveryRecordDbModel> for DeliveryRecord {
    type Error = Error;

    fn try_from(row: DeliveryRecordDbModel) -> Result<Self> {
        let notification_id = Uuid::parse_str(&row.notification_id).map_err(|e| {
            Error::Database(format!("Invalid notification id '{}': {}", row.notification_id, e))
        })?;
        let status = row
            .status
            .parse::<ProcessStatus>()
            .map_err(|_| Error::Database(format!("Invalid delivery status '{}'", row.status)))?;

        Ok(Self {
            notification_id,
            app_id: row.app_id,
            user_id: row.user_id,
            channel: row.channel,
            configuration: row.configuration,
            status,
            reason: row.reason,
            updated_at: ms_to_datetime(row.updated_at),
        })
    }
}

/// Row of `app_log`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AppLogDbModel {
    pub id: i64,
    pub app_id: String,
    pub channel: String,
    pub message: String,
    pub created_at: i64,
}

impl From<AppLogDbModel> for LogEntry {
    fn from(row: AppLogDbModel) -> Self {
        Self {
            app_id: row.app_id,
            channel: row.channel,
            message: row.message,
            created_at: ms_to_datetime(row.created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str) -> DeliveryRecordDbModel {
        DeliveryRecordDbModel {
            notification_id: Uuid::new_v4().to_string(),
            app_id: "app".to_string(),
            user_id: "user".to_string(),
            channel: "email".to_string(),
            configuration: "a@example.com".to_string(),
            status: status.to_string(),
            reason: None,
            updated_at: 0,
        }
    }

    #[test]
    fn test_record_conversion() {
        let record = DeliveryRecord::try_from(row("Handled")).unwrap();
        assert_eq!(record.status, ProcessStatus::Handled);
        assert_eq!(record.channel, "email");
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        assert!(matches!(
            DeliveryRecord::try_from(row("Delivered")),
            Err(Error::Database(_))
        ));
    }
}
