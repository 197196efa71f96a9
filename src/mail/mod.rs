//! # Outbound Mail
//!
//! Renders HTML templates from the templates directory and hands the
//! resulting `multipart/alternative` message to an [`EmailTransport`].
//!
//! Template variables are `token` plus every entry of the job's
//! `template_vars`; templates use Tera syntax (`{{ title }}`).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tera::{Context, Tera};
use thiserror::Error;
use tracing::info;

use crate::jobs::SendEmailArgs;

pub mod smtp;

pub use smtp::SmtpMailer;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Email template '{name}' could not be read: {source}")]
    TemplateNotFound {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid email template name '{0}'")]
    InvalidTemplateName(String),

    #[error("Email template rendering failed: {0}")]
    Template(#[from] tera::Error),

    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email message could not be built: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// A fully rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: String,
}

/// Delivery backend for rendered messages.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// Template renderer in front of a transport.
#[derive(Clone)]
pub struct Mailer {
    transport: Arc<dyn EmailTransport>,
    templates_path: PathBuf,
}

impl Mailer {
    pub fn new(transport: Arc<dyn EmailTransport>, templates_path: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            templates_path: templates_path.into(),
        }
    }

    /// Renders `template` with `token` and `vars`.
    ///
    /// Only bare file names are accepted; anything that could leave the
    /// templates directory is rejected.
    pub async fn render(
        &self,
        template: &str,
        token: Option<&str>,
        vars: &Map<String, Value>,
    ) -> Result<String, MailError> {
        if template.is_empty()
            || template.contains('/')
            || template.contains('\\')
            || template.contains("..")
        {
            return Err(MailError::InvalidTemplateName(template.to_string()));
        }

        let path = self.templates_path.join(template);
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| MailError::TemplateNotFound {
                name: template.to_string(),
                source,
            })?;

        let mut context = Context::new();
        context.insert("token", token.unwrap_or_default());
        for (key, value) in vars {
            context.insert(key.as_str(), value);
        }

        Ok(Tera::one_off(&source, &context, true)?)
    }

    /// Renders and delivers the email described by a `send_email` job.
    pub async fn send_templated(&self, args: &SendEmailArgs) -> Result<(), MailError> {
        let html_body = self
            .render(&args.template, args.token.as_deref(), &args.template_vars)
            .await?;

        self.transport
            .send(OutgoingEmail {
                to: args.to_email.clone(),
                subject: args.subject.clone(),
                text_body: args.text_content.clone(),
                html_body,
            })
            .await?;

        info!(to = %args.to_email, template = %args.template, "Email sent");
        Ok(())
    }
}
