use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{error, info, warn};

pub mod messages;
pub mod smtp;

pub use smtp::SmtpMailer;

/// An outbound message. Subject and bodies are already rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid email address: {0}")]
    Address(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("transport misconfigured: {0}")]
    Config(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Delivers mail with bounded retries. Address errors are not retried.
#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    attempts: u32,
    base_delay: Duration,
    redirect_to: Option<String>,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, attempts: u32) -> Self {
        Self {
            mailer,
            attempts: attempts.max(1),
            base_delay: Duration::from_millis(500),
            redirect_to: None,
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Send every message to `to` instead of its recipient (development).
    pub fn with_redirect(mut self, to: Option<String>) -> Self {
        self.redirect_to = to;
        self
    }

    pub async fn deliver(&self, mut email: Email) -> Result<(), MailError> {
        if let Some(dev) = &self.redirect_to {
            info!(original = %email.to, redirect = %dev, "redirecting outbound mail");
            email.to = dev.clone();
        }

        let mut delay = self.base_delay;
        let mut attempt = 1;
        loop {
            match self.mailer.send(&email).await {
                Ok(()) => return Ok(()),
                Err(e @ MailError::Address(_)) => return Err(e),
                Err(e) if attempt >= self.attempts => {
                    error!(error = %e, attempts = attempt, subject = %email.subject, "giving up on email");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "email send failed; retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Fire-and-forget delivery for notices sent after the state change
    /// already committed. Failures are only logged.
    pub fn deliver_in_background(&self, email: Email) {
        let notifier = self.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.deliver(email).await {
                error!(error = %e, "background notification dropped");
            }
        });
    }
}
