use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Receiver of due jobs.
///
/// Grouped batches arrive as one slice; single jobs arrive as a slice of one.
#[async_trait]
pub trait ScheduleHandler<T>: Send + Sync + 'static
where
    T: Send + Sync + 'static,
{
    /// Deliver the jobs.
    ///
    /// `Ok(false)` or an error schedules another attempt unless
    /// `is_last_attempt` is set, in which case [`Self::handle_exception`]
    /// follows.
    async fn handle(
        &self,
        jobs: &[T],
        is_last_attempt: bool,
        ct: &CancellationToken,
    ) -> anyhow::Result<bool>;

    /// Terminal bookkeeping after the last attempt failed. Runs once per batch.
    async fn handle_exception(&self, jobs: &[T], error: &anyhow::Error);
}
