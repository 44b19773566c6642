//! Apps and their configured provider integrations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A provider integration configured for an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredIntegration {
    pub id: String,
    /// Provider kind, used to look up the registered provider.
    pub kind: String,
    /// Lower values are tried first.
    pub priority: i32,
    pub enabled: bool,
    /// `Some(true)` only for test notifications, `Some(false)` only for
    /// regular ones, `None` for both.
    pub test: Option<bool>,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl ConfiguredIntegration {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            priority,
            enabled: true,
            test: None,
            properties: HashMap::new(),
        }
    }

    pub fn accepts(&self, is_test: bool) -> bool {
        self.enabled && self.test.is_none_or(|test| test == is_test)
    }
}

/// A tenant of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    pub name: String,
    /// Default language, used when a template has no translation for the
    /// user's language.
    pub language: String,
    #[serde(default)]
    pub integrations: Vec<ConfiguredIntegration>,
}

impl App {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            language: language.into(),
            integrations: Vec::new(),
        }
    }

    pub fn with_integration(mut self, integration: ConfiguredIntegration) -> Self {
        self.integrations.push(integration);
        self
    }
}
