//! Outbound email. Handlers only see the [`Mailer`] contract; delivery is
//! handed to a background queue in production.
mod queue;
mod smtp;

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub use queue::MailQueue;
pub use smtp::SmtpMailer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutboundEmail {
    pub fn new(to: Vec<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to,
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MailerError {
    #[error("no recipients")]
    NoRecipients,
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("mail queue unavailable")]
    QueueUnavailable,
    #[error("mail send timed out")]
    Timeout,
    #[error("mail transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailerError>;
}

/// Transport that writes deliveries to the log. Used when SMTP is not configured.
#[derive(Debug, Clone)]
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailerError> {
        if email.to.is_empty() {
            return Err(MailerError::NoRecipients);
        }
        info!(
            from = %self.from,
            recipients = email.to.len(),
            subject = %email.subject,
            "email delivered to log transport"
        );
        Ok(())
    }
}

/// Keeps every message in memory; lets callers read back what was sent.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<OutboundEmail> {
        self.sent().pop()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailerError> {
        if email.to.is_empty() {
            return Err(MailerError::NoRecipients);
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(email);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) struct FailingMailer;

#[cfg(test)]
#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _email: OutboundEmail) -> Result<(), MailerError> {
        Err(MailerError::Transport("smtp down".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_mailer_keeps_messages() {
        let mailer = RecordingMailer::new();
        mailer
            .send(OutboundEmail::new(vec!["a@x.com".into()], "Hi", "Body"))
            .await
            .unwrap();
        assert_eq!(mailer.sent().len(), 1);
        assert_eq!(mailer.last().unwrap().subject, "Hi");
    }

    #[tokio::test]
    async fn empty_recipient_list_is_rejected() {
        let err = LogMailer::new("me@x.com")
            .send(OutboundEmail::new(vec![], "s", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, MailerError::NoRecipients));
    }
}
