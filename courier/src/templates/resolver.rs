//! Template resolution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::stores::AppStore;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "PascalCase")]
#[serde(rename_all = "PascalCase")]
pub enum TemplateResolveStatus {
    /// Translation for the requested language.
    Resolved,
    /// Translation for the app's default language.
    ResolvedWithFallback,
    /// The template exists without a usable translation.
    LanguageNotFound,
    NotFound,
}

/// Outcome of a template lookup.
///
/// A template is present exactly when the status is one of the resolved
/// variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateResolution<T> {
    status: TemplateResolveStatus,
    template: Option<T>,
}

impl<T> TemplateResolution<T> {
    pub fn resolved(template: T) -> Self {
        Self {
            status: TemplateResolveStatus::Resolved,
            template: Some(template),
        }
    }

    pub fn resolved_with_fallback(template: T) -> Self {
        Self {
            status: TemplateResolveStatus::ResolvedWithFallback,
            template: Some(template),
        }
    }

    pub fn language_not_found() -> Self {
        Self {
            status: TemplateResolveStatus::LanguageNotFound,
            template: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: TemplateResolveStatus::NotFound,
            template: None,
        }
    }

    pub fn status(&self) -> TemplateResolveStatus {
        self.status
    }

    pub fn template(&self) -> Option<&T> {
        self.template.as_ref()
    }

    pub fn into_template(self) -> Option<T> {
        self.template
    }
}

/// A named template with one translation per language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTemplate<T> {
    pub name: String,
    /// Used when a notification does not name a template.
    pub primary: bool,
    pub languages: HashMap<String, T>,
}

impl<T> ChannelTemplate<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary: false,
            languages: HashMap::new(),
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>, template: T) -> Self {
        self.languages.insert(language.into(), template);
        self
    }
}

/// Lookup of an app's templates for one channel.
#[async_trait]
pub trait ChannelTemplateStore<T>: Send + Sync {
    /// The named template, or the app's primary template when `name` is `None`.
    async fn get(&self, app_id: &str, name: Option<&str>) -> Result<Option<ChannelTemplate<T>>>;
}

/// Pick the best translation of `template`.
pub fn resolve_best<T: Clone>(
    template: Option<&ChannelTemplate<T>>,
    language: &str,
    default_language: &str,
) -> TemplateResolution<T> {
    let Some(template) = template else {
        return TemplateResolution::not_found();
    };

    if let Some(translation) = template.languages.get(language) {
        return TemplateResolution::resolved(translation.clone());
    }

    match template.languages.get(default_language) {
        Some(translation) => TemplateResolution::resolved_with_fallback(translation.clone()),
        None => TemplateResolution::language_not_found(),
    }
}

/// Resolves templates against the app's default language.
pub struct TemplateResolver<T> {
    apps: Arc<dyn AppStore>,
    store: Arc<dyn ChannelTemplateStore<T>>,
    default_language: String,
}

impl<T> TemplateResolver<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// `default_language` applies when the app is gone.
    pub fn new(
        apps: Arc<dyn AppStore>,
        store: Arc<dyn ChannelTemplateStore<T>>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            apps,
            store,
            default_language: default_language.into(),
        }
    }

    pub async fn get_best(
        &self,
        app_id: &str,
        name: Option<&str>,
        language: &str,
    ) -> Result<TemplateResolution<T>> {
        let template = self.store.get(app_id, name).await?;

        let default_language = self
            .apps
            .get_cached(app_id)
            .await?
            .map(|app| app.language)
            .unwrap_or_else(|| self.default_language.clone());

        let resolution = resolve_best(template.as_ref(), language, &default_language);
        debug!(
            app_id = %app_id,
            template = name.unwrap_or("<primary>"),
            language = %language,
            status = %resolution.status(),
            "Resolved template"
        );
        Ok(resolution)
    }
}

/// Templates kept in memory, keyed by app.
pub struct InMemoryTemplateStore<T> {
    templates: DashMap<String, Vec<ChannelTemplate<T>>>,
}

impl<T> Default for InMemoryTemplateStore<T> {
    fn default() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }
}

impl<T> InMemoryTemplateStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template by name.
    pub fn insert(&self, app_id: impl Into<String>, template: ChannelTemplate<T>) {
        let mut templates = self.templates.entry(app_id.into()).or_default();
        templates.retain(|existing| existing.name != template.name);
        templates.push(template);
    }
}

#[async_trait]
impl<T> ChannelTemplateStore<T> for InMemoryTemplateStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn get(&self, app_id: &str, name: Option<&str>) -> Result<Option<ChannelTemplate<T>>> {
        let Some(templates) = self.templates.get(app_id) else {
            return Ok(None);
        };

        let found = match name {
            Some(name) => templates.iter().find(|t| t.name == name),
            None => templates.iter().find(|t| t.primary),
        };
        Ok(found.cloned())
    }
}
