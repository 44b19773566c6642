use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Scheduler {0} has been shut down")]
    ShutDown(String),

    #[error("Scheduler {0} is already running")]
    AlreadyStarted(String),

    #[error("Invalid schedule key: {0}")]
    InvalidKey(String),

    #[error("Job store error: {0}")]
    Store(String),
}
