//! SQLite implementations of the delivery tracker, app log and job store.

pub mod delivery;
pub mod log;
pub mod scheduled_job;

pub use delivery::SqlxDeliveryTracker;
pub use log::SqlxLogStore;
pub use scheduled_job::SqlxJobStore;
