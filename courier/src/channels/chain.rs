//! Sender chain execution.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ChannelContext;
use crate::integrations::{ProviderSender, SendOutcome, TerminalEffect};
use crate::{Error, Result};

/// How a chain ended without an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChainOutcome {
    Delivered {
        sender: String,
    },
    /// The destination is permanently invalid; the channel applies `effect`.
    Terminal {
        sender: String,
        reason: String,
        effect: TerminalEffect,
    },
}

/// Try `senders` in order until one delivers.
///
/// A rejection is written to the app log and the next sender is tried; an
/// unclassified error moves on silently. If the last sender fails either way
/// the failure is returned so the scheduler retries. An invalid destination
/// stops the chain immediately.
pub(crate) async fn run<S, F, Fut>(
    channel: &str,
    app_id: &str,
    senders: &[Arc<S>],
    ctx: &ChannelContext,
    ct: &CancellationToken,
    mut send: F,
) -> Result<ChainOutcome>
where
    S: ProviderSender + ?Sized,
    F: FnMut(Arc<S>) -> Fut,
    Fut: Future<Output = Result<SendOutcome>>,
{
    let last = senders.len().saturating_sub(1);

    for (i, sender) in senders.iter().enumerate() {
        if ct.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let is_last = i == last;
        let name = sender.name().to_string();

        match send(Arc::clone(sender)).await {
            Ok(SendOutcome::Delivered) => {
                debug!(channel = %channel, app_id = %app_id, sender = %name, "Delivered");
                return Ok(ChainOutcome::Delivered { sender: name });
            }
            Ok(SendOutcome::DestinationInvalid { reason, effect }) => {
                return Ok(ChainOutcome::Terminal {
                    sender: name,
                    reason,
                    effect,
                });
            }
            Ok(SendOutcome::Rejected { reason }) => {
                ctx.log(app_id, channel, &format!("{} rejected the message: {}", name, reason))
                    .await;
                if is_last {
                    return Err(Error::senders_exhausted(channel, reason));
                }
            }
            Err(e) => {
                warn!(
                    channel = %channel,
                    app_id = %app_id,
                    sender = %name,
                    error = %e,
                    "Sender failed"
                );
                if is_last {
                    return Err(e);
                }
            }
        }
    }

    Err(Error::senders_exhausted(channel, "no sender configured"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::IntegrationManager;
    use crate::stores::{
        InMemoryAppStore, InMemoryDeliveryTracker, InMemoryLogStore, InMemoryUserStore, LogStore,
    };
    use crate::utils::SystemClock;

    struct Scripted {
        name: &'static str,
        outcome: fn() -> Result<SendOutcome>,
    }

    impl ProviderSender for Scripted {
        fn name(&self) -> &str {
            self.name
        }
    }

    fn scripted(name: &'static str, outcome: fn() -> Result<SendOutcome>) -> Scripted {
        Scripted { name, outcome }
    }

    fn context(logs: Arc<InMemoryLogStore>) -> ChannelContext {
        ChannelContext {
            apps: Arc::new(InMemoryAppStore::new()),
            users: Arc::new(InMemoryUserStore::new()),
            integrations: Arc::new(IntegrationManager::new()),
            tracker: Arc::new(InMemoryDeliveryTracker::new()),
            logs,
            clock: Arc::new(SystemClock),
            job_store: None,
        }
    }

    async fn run_scripted(
        senders: Vec<Scripted>,
        logs: Arc<InMemoryLogStore>,
    ) -> (Result<ChainOutcome>, Vec<&'static str>) {
        let senders: Vec<Arc<Scripted>> = senders.into_iter().map(Arc::new).collect();
        let ctx = context(logs);
        let called = parking_lot::Mutex::new(Vec::new());
        let ct = CancellationToken::new();
        let result = run("email", "app", &senders, &ctx, &ct, |sender| {
            called.lock().push(sender.name);
            async move { (sender.outcome)() }
        })
        .await;
        (result, called.into_inner())
    }

    #[tokio::test]
    async fn test_rejection_falls_back_to_next_sender() {
        let logs = Arc::new(InMemoryLogStore::new());
        let (result, called) = run_scripted(
            vec![
                scripted("a", || Ok(SendOutcome::rejected("quota"))),
                scripted("b", || Ok(SendOutcome::Delivered)),
            ],
            logs.clone(),
        )
        .await;

        assert_eq!(
            result.unwrap(),
            ChainOutcome::Delivered {
                sender: "b".to_string()
            }
        );
        assert_eq!(called, vec!["a", "b"]);

        let entries = logs.entries("app", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.contains("quota"));
    }

    #[tokio::test]
    async fn test_last_rejection_is_an_error() {
        let logs = Arc::new(InMemoryLogStore::new());
        let (result, _) = run_scripted(
            vec![scripted("a", || Ok(SendOutcome::rejected("quota")))],
            logs,
        )
        .await;

        assert!(matches!(result, Err(Error::SendersExhausted { .. })));
    }

    #[tokio::test]
    async fn test_unclassified_error_moves_on_then_propagates() {
        let logs = Arc::new(InMemoryLogStore::new());
        let (result, called) = run_scripted(
            vec![
                scripted("a", || Err(Error::provider("timeout"))),
                scripted("b", || Err(Error::provider("refused"))),
            ],
            logs.clone(),
        )
        .await;

        assert_eq!(called, vec!["a", "b"]);
        assert!(matches!(result, Err(Error::Provider(msg)) if msg == "refused"));
        assert!(logs.entries("app", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_destination_stops_chain() {
        let logs = Arc::new(InMemoryLogStore::new());
        let (result, called) = run_scripted(
            vec![
                scripted("a", || {
                    Ok(SendOutcome::destination_invalid(
                        "unregistered",
                        TerminalEffect::RemoveDestination,
                    ))
                }),
                scripted("b", || Ok(SendOutcome::Delivered)),
            ],
            logs,
        )
        .await;

        assert_eq!(called, vec!["a"]);
        assert_eq!(
            result.unwrap(),
            ChainOutcome::Terminal {
                sender: "a".to_string(),
                reason: "unregistered".to_string(),
                effect: TerminalEffect::RemoveDestination,
            }
        );
    }

    #[tokio::test]
    async fn test_cancelled_chain() {
        let senders = vec![Arc::new(scripted("a", || Ok(SendOutcome::Delivered)))];
        let ctx = context(Arc::new(InMemoryLogStore::new()));
        let ct = CancellationToken::new();
        ct.cancel();

        let result = run("email", "app", &senders, &ctx, &ct, |sender| async move {
            (sender.outcome)()
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
