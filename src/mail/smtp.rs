use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use super::{Mailer, MailerError, OutboundEmail};
use crate::config::SmtpConfig;

/// Delivers through an SMTP relay. Pooled connections, rustls for STARTTLS.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig, from: &str) -> anyhow::Result<Self> {
        let from: Mailbox = from
            .parse()
            .with_context(|| format!("invalid MAIL_FROM address {from:?}"))?;

        let builder = if cfg.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
                .with_context(|| format!("smtp relay {}", cfg.host))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.host)
        };
        let mut builder = builder.port(cfg.port);

        if let (Some(user), Some(password)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(user.clone(), password.clone()));
        }

        info!(host = %cfg.host, port = cfg.port, starttls = cfg.starttls, "smtp transport configured");
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, MailerError> {
    addr.parse()
        .map_err(|_| MailerError::InvalidAddress(addr.to_string()))
}

/// One recipient goes in `To`; a broadcast goes in `Bcc` so recipients
/// never see each other's addresses.
fn build_message(from: &Mailbox, email: &OutboundEmail) -> Result<Message, MailerError> {
    let mut builder = Message::builder()
        .from(from.clone())
        .subject(email.subject.clone())
        .header(ContentType::TEXT_PLAIN);

    match email.to.as_slice() {
        [] => return Err(MailerError::NoRecipients),
        [only] => builder = builder.to(parse_mailbox(only)?),
        many => {
            for addr in many {
                builder = builder.bcc(parse_mailbox(addr)?);
            }
        }
    }

    builder
        .body(email.body.clone())
        .map_err(|e| MailerError::Transport(e.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailerError> {
        let message = build_message(&self.from, &email)?;
        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| MailerError::Transport(e.to_string()))?;
        debug!(
            code = %response.code(),
            recipients = email.to.len(),
            "smtp relay accepted message"
        );
        Ok(())
    }
}
