//! SMTP notifier using the `lettre` crate.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use trellis_application::Notifier;
use trellis_core::{AppError, AppResult};

/// SMTP notifier configuration.
#[derive(Clone)]
pub struct SmtpNotifierConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// SMTP username.
    pub username: String,
    /// SMTP password.
    pub password: String,
    /// Sender email address.
    pub from_address: String,
    /// Subject line used for engine notifications.
    pub subject: String,
}

/// Production notifier delivering messages over SMTP.
#[derive(Clone)]
pub struct SmtpNotifier {
    config: SmtpNotifierConfig,
}

impl SmtpNotifier {
    /// Creates a new SMTP notifier.
    #[must_use]
    pub fn new(config: SmtpNotifierConfig) -> Self {
        Self { config }
    }

    async fn send_one(&self, recipient: &str, message_body: &str) -> AppResult<()> {
        let from = self
            .config
            .from_address
            .parse()
            .map_err(|error| AppError::Internal(format!("invalid from address: {error}")))?;

        let to_mailbox = recipient
            .parse()
            .map_err(|error| AppError::Internal(format!("invalid recipient address: {error}")))?;

        let message = Message::builder()
            .from(from)
            .to(to_mailbox)
            .subject(self.config.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message_body.to_owned())
            .map_err(|error| AppError::Internal(format!("failed to build email: {error}")))?;

        let credentials =
            Credentials::new(self.config.username.clone(), self.config.password.clone());

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&self.config.host)
            .map_err(|error| {
                AppError::Internal(format!("failed to create SMTP transport: {error}"))
            })?
            .port(self.config.port)
            .credentials(credentials)
            .build();

        mailer
            .send(message)
            .await
            .map_err(|error| AppError::Transient(format!("failed to send email: {error}")))?;

        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, recipients: &[String], message: &str) -> AppResult<()> {
        for recipient in recipients {
            self.send_one(recipient.as_str(), message).await?;
        }

        Ok(())
    }
}
