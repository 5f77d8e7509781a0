// THEORY:
// The `notifier` module is the alarm's single outbound side effect: telling a human
// that fire has been confirmed. A dispatch is one attempt with a fixed message. It is
// never retried and never queued. The alarm spawns it on its own task and moves on.
//
// `Notifier::dispatch` returns a boxed `'static` future so that implementations can
// be held behind `Arc<dyn Notifier>` and the future can outlive the call that made it.

use crate::config::SmtpConfig;
use futures::future::{BoxFuture, FutureExt};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::info;

pub const ALERT_SUBJECT: &str = "🔥 FIRE ALERT 🔥";
pub const ALERT_BODY: &str = "Fire detected by surveillance system. Please check immediately!";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build alert message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("{0}")]
    Other(String),
}

/// One-shot, best-effort alert dispatch.
pub trait Notifier: Send + Sync {
    fn dispatch(&self) -> BoxFuture<'static, Result<(), NotifyError>>;
}

/// Sends the fixed alert email over SMTP with STARTTLS.
#[derive(Clone)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    message: Message,
    recipient: Mailbox,
}

impl EmailNotifier {
    /// Builds the transport and the alert message up front, so a bad address or
    /// relay name is caught at startup rather than at the first fire.
    pub fn new(smtp: &SmtpConfig) -> Result<Self, NotifyError> {
        let sender: Mailbox = smtp.sender_email.parse()?;
        let recipient: Mailbox = smtp.recipient_email.parse()?;

        let message = Message::builder()
            .from(sender)
            .to(recipient.clone())
            .subject(ALERT_SUBJECT)
            .header(ContentType::TEXT_PLAIN)
            .body(ALERT_BODY.to_string())?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.server)?
            .port(smtp.port)
            .credentials(Credentials::new(
                smtp.sender_email.clone(),
                smtp.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            message,
            recipient,
        })
    }
}

impl Notifier for EmailNotifier {
    fn dispatch(&self) -> BoxFuture<'static, Result<(), NotifyError>> {
        let transport = self.transport.clone();
        let message = self.message.clone();
        let recipient = self.recipient.to_string();
        async move {
            info!(%recipient, "sending alert email");
            transport.send(message).await?;
            info!(%recipient, "alert email sent");
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp() -> SmtpConfig {
        SmtpConfig {
            server: "smtp.example.com".to_string(),
            port: 587,
            sender_email: "watch@example.com".to_string(),
            password: "app-password".to_string(),
            recipient_email: "ops@example.com".to_string(),
        }
    }

    #[test]
    fn builds_from_valid_settings() {
        let notifier = EmailNotifier::new(&smtp()).expect("valid smtp settings");
        let raw = String::from_utf8(notifier.message.formatted()).unwrap();
        assert!(raw.contains("To: ops@example.com"));
        assert!(raw.contains(ALERT_BODY));
    }

    #[test]
    fn rejects_malformed_recipient() {
        let mut settings = smtp();
        settings.recipient_email = "not an address".to_string();
        assert!(matches!(EmailNotifier::new(&settings), Err(NotifyError::Address(_))));
    }
}
