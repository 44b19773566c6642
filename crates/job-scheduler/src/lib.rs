//! Keyed job scheduler.
//!
//! Jobs are scheduled under an arbitrary schedule key and handed to a
//! [`ScheduleHandler`] once they become due:
//!
//! - [`Scheduler::schedule_grouped`] appends to a batch that is delivered as a
//!   whole when its delay elapses (or when it reaches the configured size).
//! - [`Scheduler::schedule`] schedules a single job at an absolute time; a later
//!   call with the same key replaces the pending job.
//!
//! Deliveries for the same key never overlap. Failed deliveries are retried
//! with exponential backoff until the attempt budget is spent, after which
//! [`ScheduleHandler::handle_exception`] runs once for terminal bookkeeping.
//!
//! Schedulers built with [`Scheduler::with_store`] write pending batches to a
//! [`JobStore`] and reload them on start, so queued work outlives the process.
//!
//! # Example
//!
//! ```ignore
//! use job_scheduler::{Scheduler, SchedulerConfig};
//!
//! let scheduler = Scheduler::<MyJob>::with_store("email", config, Some(store));
//! scheduler.start(handler)?;
//! scheduler
//!     .schedule_grouped("user-1", job, Duration::from_secs(60), false)
//!     .await?;
//! ```

mod backoff;
mod error;
mod handler;
mod scheduler;
mod store;

pub use backoff::RetryPolicy;
pub use error::{Result, SchedulerError};
pub use handler::ScheduleHandler;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats};
pub use store::{JobStore, MemoryJobStore, StoredBatch};
