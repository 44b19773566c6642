//! Sender resolution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{EmailSender, IntegrationProvider, MobilePushSender};
use crate::domain::{App, ConfiguredIntegration, Notification};

/// Sender types that can be resolved from an integration.
pub trait SenderCapability {
    fn create(
        provider: &dyn IntegrationProvider,
        integration: &ConfiguredIntegration,
    ) -> Option<Arc<Self>>;
}

impl SenderCapability for dyn EmailSender {
    fn create(
        provider: &dyn IntegrationProvider,
        integration: &ConfiguredIntegration,
    ) -> Option<Arc<Self>> {
        provider.email_sender(integration)
    }
}

impl SenderCapability for dyn MobilePushSender {
    fn create(
        provider: &dyn IntegrationProvider,
        integration: &ConfiguredIntegration,
    ) -> Option<Arc<Self>> {
        provider.mobile_push_sender(integration)
    }
}

/// Registry of provider kinds.
#[derive(Default, Clone)]
pub struct IntegrationManager {
    providers: HashMap<String, Arc<dyn IntegrationProvider>>,
}

impl IntegrationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn IntegrationProvider>) {
        self.providers.insert(provider.kind().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn IntegrationProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Senders of type `S` for the app, primary first.
    ///
    /// Only enabled integrations that accept the notification's test flag are
    /// used. Integrations with equal priority keep their configured order.
    pub fn resolve<S>(&self, app: &App, notification: &Notification) -> Vec<Arc<S>>
    where
        S: SenderCapability + ?Sized,
    {
        let mut integrations: Vec<&ConfiguredIntegration> = app
            .integrations
            .iter()
            .filter(|integration| integration.accepts(notification.test))
            .collect();
        integrations.sort_by_key(|integration| integration.priority);

        integrations
            .into_iter()
            .filter_map(|integration| {
                let provider = self.providers.get(&integration.kind);
                if provider.is_none() {
                    debug!(
                        app_id = %app.id,
                        integration = %integration.id,
                        kind = %integration.kind,
                        "No provider registered for integration"
                    );
                }
                provider.and_then(|provider| S::create(provider.as_ref(), integration))
            })
            .collect()
    }

    /// Whether at least one sender of type `S` is available.
    pub fn is_configured<S>(&self, app: &App, notification: &Notification) -> bool
    where
        S: SenderCapability + ?Sized,
    {
        !self.resolve::<S>(app, notification).is_empty()
    }
}
