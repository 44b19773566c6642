//! Database row models.

mod delivery;
mod scheduled_job;

pub use delivery::{AppLogDbModel, DeliveryRecordDbModel};
pub use scheduled_job::ScheduledJobDbModel;
