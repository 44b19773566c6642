//! Email templates rendered with Handlebars.

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::{App, Notification, User};
use crate::integrations::EmailMessage;
use crate::{Error, Result};

/// Translation of an email template.
///
/// Every part is a Handlebars template rendered against the app, the user and
/// the list of grouped notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
}

impl EmailTemplate {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body_html: None,
            body_text: None,
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = Some(html.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body_text = Some(text.into());
        self
    }
}

/// Renders grouped notifications into one email.
pub struct EmailFormatter {
    html: Handlebars<'static>,
    plain: Handlebars<'static>,
}

impl EmailFormatter {
    pub fn new() -> Self {
        let mut html = Handlebars::new();
        html.set_strict_mode(true);

        let mut plain = Handlebars::new();
        plain.set_strict_mode(true);
        plain.register_escape_fn(handlebars::no_escape);

        Self { html, plain }
    }

    pub fn format(
        &self,
        template: &EmailTemplate,
        notifications: &[&Notification],
        app: &App,
        user: &User,
        to_email: &str,
    ) -> Result<EmailMessage> {
        if notifications.is_empty() {
            return Err(Error::validation("No notifications to format"));
        }

        let context = Self::context(notifications, app, user, to_email);

        let subject = Self::render(&self.plain, "subject", &template.subject, &context)?;
        let subject = subject.trim().to_string();
        if subject.is_empty() {
            return Err(Error::formatting("Rendered subject is empty"));
        }

        let body_html = template
            .body_html
            .as_deref()
            .map(|body| Self::render(&self.html, "html body", body, &context))
            .transpose()?;
        let body_text = template
            .body_text
            .as_deref()
            .map(|body| Self::render(&self.plain, "text body", body, &context))
            .transpose()?;

        if body_html.is_none() && body_text.is_none() {
            return Err(Error::formatting("Template has neither an HTML nor a text body"));
        }

        Ok(EmailMessage {
            to_email: to_email.to_string(),
            to_name: user.full_name.clone(),
            subject,
            body_html,
            body_text,
        })
    }

    fn render(
        engine: &Handlebars<'static>,
        part: &str,
        source: &str,
        context: &serde_json::Value,
    ) -> Result<String> {
        engine
            .render_template(source, context)
            .map_err(|e| Error::formatting(format!("Failed to render {}: {}", part, e)))
    }

    fn context(
        notifications: &[&Notification],
        app: &App,
        user: &User,
        to_email: &str,
    ) -> serde_json::Value {
        let notifications: Vec<serde_json::Value> = notifications
            .iter()
            .map(|notification| {
                let formatting = notification.formatting.clone().unwrap_or_default();
                json!({
                    "id": notification.id.to_string(),
                    "subject": formatting.subject,
                    "body": formatting.body,
                    "link_url": formatting.link_url,
                    "link_text": formatting.link_text,
                    "image_small": formatting.image_small,
                    "image_large": formatting.image_large,
                    "created": notification.created.to_rfc3339(),
                })
            })
            .collect();

        json!({
            "app": {
                "id": app.id,
                "name": app.name,
            },
            "user": {
                "id": user.id,
                "full_name": user.full_name,
                "email": to_email,
            },
            "notifications": notifications,
        })
    }
}

impl Default for EmailFormatter {
    fn default() -> Self {
        Self::new()
    }
}
