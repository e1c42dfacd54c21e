//! Email channel — SMTP via lettre for outbound forwarding.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::error::SendError;
use crate::settings::SmtpConfig;

/// Socket timeout for one SMTP session.
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outbound send primitive for the email channel.
///
/// All recipients go into a single message.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        smtp: &SmtpConfig,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), SendError>;
}

/// SMTP sender using lettre's blocking transport on the blocking pool.
pub struct SmtpMailSender;

impl SmtpMailSender {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SmtpMailSender {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the outgoing message. Address problems are permanent.
pub fn build_message(
    from: &str,
    recipients: &[String],
    subject: &str,
    body: &str,
) -> Result<Message, SendError> {
    let from: Mailbox = from
        .parse()
        .map_err(|e| SendError::Permanent(format!("Invalid from address '{from}': {e}")))?;

    let mut builder = Message::builder().from(from).subject(subject);
    for recipient in recipients {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| SendError::Permanent(format!("Invalid recipient '{recipient}': {e}")))?;
        builder = builder.to(to);
    }

    builder
        .body(body.to_string())
        .map_err(|e| SendError::Permanent(format!("Failed to build email: {e}")))
}

fn send_blocking(smtp: &SmtpConfig, email: &Message) -> Result<(), SendError> {
    let creds = Credentials::new(
        smtp.username.clone(),
        smtp.password.expose_secret().to_string(),
    );

    let transport = SmtpTransport::relay(&smtp.host)
        .map_err(|e| SendError::Permanent(format!("SMTP relay error: {e}")))?
        .port(smtp.port)
        .credentials(creds)
        .timeout(Some(SMTP_TIMEOUT))
        .build();

    transport.send(email).map_err(|e| {
        if e.is_permanent() || e.is_client() {
            SendError::Permanent(format!("SMTP send failed: {e}"))
        } else {
            SendError::Transient(format!("SMTP send failed: {e}"))
        }
    })?;
    Ok(())
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(
        &self,
        smtp: &SmtpConfig,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), SendError> {
        let email = build_message(smtp.sender_address(), recipients, subject, body)?;
        let smtp = smtp.clone();
        let count = recipients.len();

        tokio::task::spawn_blocking(move || send_blocking(&smtp, &email))
            .await
            .map_err(|e| SendError::Transient(format!("SMTP task failed: {e}")))??;

        tracing::info!(recipients = count, "Email forwarded");
        Ok(())
    }
}
