use async_trait::async_trait;

use crate::error::DeliveryError;

/// A rendered message, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail seam. An SMTP client lives behind this trait in a real deployment.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, mail: &Mail) -> Result<(), DeliveryError>;
}

/// Writes every message to the log instead of sending it.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, mail: &Mail) -> Result<(), DeliveryError> {
        tracing::info!(
            to = %mail.to,
            from = %mail.from,
            subject = %mail.subject,
            bytes = mail.body.len(),
            "mail handed to log transport"
        );
        tracing::debug!("mail body:\n{}", mail.body);
        Ok(())
    }
}
