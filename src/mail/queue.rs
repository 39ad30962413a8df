use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, info, warn};

use super::{Mailer, MailerError, OutboundEmail};
use crate::config::MailConfig;

/// Front of the outbound-mail worker. `send` only enqueues; the worker
/// delivers through the wrapped transport with timeout and backoff.
#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::Sender<OutboundEmail>,
}

const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Clone)]
struct RetryPolicy {
    max_attempts: u32,
    send_timeout: Duration,
    backoff_base: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }
}

impl MailQueue {
    pub fn spawn(transport: Arc<dyn Mailer>, cfg: &MailConfig) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(cfg.queue_capacity.max(1));
        let policy = RetryPolicy {
            max_attempts: cfg.max_attempts.max(1),
            send_timeout: Duration::from_secs(cfg.send_timeout_secs),
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
        };
        let worker = tokio::spawn(run_worker(rx, transport, policy));
        (Self { tx }, worker)
    }
}

#[async_trait]
impl Mailer for MailQueue {
    async fn send(&self, email: OutboundEmail) -> Result<(), MailerError> {
        if email.to.is_empty() {
            return Err(MailerError::NoRecipients);
        }
        self.tx.try_send(email).map_err(|e| {
            error!(error = %e, "mail queue rejected message");
            MailerError::QueueUnavailable
        })
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<OutboundEmail>,
    transport: Arc<dyn Mailer>,
    policy: RetryPolicy,
) {
    while let Some(email) = rx.recv().await {
        deliver(transport.as_ref(), email, &policy).await;
    }
    info!("mail queue closed; worker exiting");
}

async fn deliver(transport: &dyn Mailer, email: OutboundEmail, policy: &RetryPolicy) -> bool {
    for attempt in 1..=policy.max_attempts {
        let result = tokio::time::timeout(policy.send_timeout, transport.send(email.clone()))
            .await
            .unwrap_or(Err(MailerError::Timeout));
        match result {
            Ok(()) => return true,
            Err(e) if attempt < policy.max_attempts => {
                let wait = policy.backoff(attempt);
                warn!(error = %e, attempt, retry_in_ms = wait.as_millis() as u64, "mail send failed; retrying");
                tokio::time::sleep(wait).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    attempt,
                    recipients = email.to.len(),
                    subject = %email.subject,
                    "mail send failed; giving up"
                );
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::mail::RecordingMailer;

    struct Flaky {
        failures_left: AtomicU32,
        inner: RecordingMailer,
    }

    #[async_trait]
    impl Mailer for Flaky {
        async fn send(&self, email: OutboundEmail) -> Result<(), MailerError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(MailerError::Transport("temporary".into()));
            }
            self.inner.send(email).await
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            send_timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(1),
        }
    }

    fn email() -> OutboundEmail {
        OutboundEmail::new(vec!["a@x.com".into()], "s", "b")
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 4,
            send_timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(100),
        };
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn deliver_retries_until_success() {
        let flaky = Flaky {
            failures_left: AtomicU32::new(2),
            inner: RecordingMailer::new(),
        };
        assert!(deliver(&flaky, email(), &policy(3)).await);
        assert_eq!(flaky.inner.sent().len(), 1);
    }

    #[tokio::test]
    async fn deliver_gives_up_after_max_attempts() {
        let flaky = Flaky {
            failures_left: AtomicU32::new(5),
            inner: RecordingMailer::new(),
        };
        assert!(!deliver(&flaky, email(), &policy(2)).await);
        assert!(flaky.inner.sent().is_empty());
    }

    #[tokio::test]
    async fn queue_hands_messages_to_transport() {
        let recorder = Arc::new(RecordingMailer::new());
        let cfg = MailConfig {
            backoff_base_ms: 1,
            ..MailConfig::default()
        };
        let (queue, worker) = MailQueue::spawn(recorder.clone(), &cfg);
        queue.send(email()).await.unwrap();
        drop(queue);
        worker.await.unwrap();
        assert_eq!(recorder.sent().len(), 1);
    }
}
