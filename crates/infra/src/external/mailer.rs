use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// A rendered email ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MailerError {
    /// The provider refused the message (bad address, suppressed recipient).
    #[error("message rejected: {0}")]
    Rejected(String),
    #[error("mail transport error: {0}")]
    Transport(String),
}

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError>;
}

#[async_trait]
impl<T: Mailer + ?Sized> Mailer for Arc<T> {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError> {
        (**self).send(message).await
    }
}

/// Writes messages to the log instead of delivering them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailerError> {
        info!(to = %message.to, subject = %message.subject, "email delivered to log");
        Ok(())
    }
}
