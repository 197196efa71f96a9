//! SMTP delivery through lettre's async transport.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{EmailTransport, MailError, OutgoingEmail};
use crate::config::SmtpConfig;

/// Sends mail over SMTP using implicit TLS, STARTTLS or a plain connection.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> Result<Self, MailError> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let mut builder = builder.port(config.port);
        if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                config.password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from: Mailbox::new(Some(config.from_name.clone()), config.from_email.parse()?),
        })
    }

    fn build_message(&self, email: OutgoingEmail) -> Result<Message, MailError> {
        Ok(Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject)
            .multipart(MultiPart::alternative_plain_html(
                email.text_body,
                email.html_body,
            ))?)
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let message = self.build_message(email)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SmtpConfig {
        SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            username: None,
            password: None,
            use_tls: false,
            use_starttls: false,
            from_email: "noreply@hexoteams.local".into(),
            from_name: "HexoTeams".into(),
            templates_path: "templates".into(),
        }
    }

    #[tokio::test]
    async fn message_is_multipart_alternative_from_configured_sender() {
        let mailer = SmtpMailer::from_config(&config()).unwrap();
        let message = mailer
            .build_message(OutgoingEmail {
                to: "ada@example.com".into(),
                subject: "Hi".into(),
                text_body: "plain".into(),
                html_body: "<b>html</b>".into(),
            })
            .unwrap();

        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: HexoTeams <noreply@hexoteams.local>"));
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("To: ada@example.com"));
    }

    #[tokio::test]
    async fn invalid_sender_address_is_rejected() {
        let mut config = config();
        config.from_email = "not-an-address".into();
        assert!(matches!(
            SmtpMailer::from_config(&config),
            Err(MailError::Address(_))
        ));
    }
}
