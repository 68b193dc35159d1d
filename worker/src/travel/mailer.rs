//! Mail transport seam.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Rendered email ready for transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMail {
    pub subject: String,
    pub body_text: String,
    pub body_html: Option<String>,
    pub from_addr: String,
    pub to_addrs: Vec<String>,
}

#[derive(Debug, Error)]
#[error("mail transport failed: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_mail(&self, mail: &OutboundMail) -> Result<(), TransportError>;
}

/// Logs outbound mail instead of sending it (the development backend).
#[derive(Default)]
pub struct ConsoleMailer;

impl ConsoleMailer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn send_mail(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        info!(
            subject = %mail.subject,
            to = %mail.to_addrs.join(","),
            from = %mail.from_addr,
            body_length = mail.body_text.len(),
            has_html = mail.body_html.is_some(),
            "mail_delivered"
        );
        Ok(())
    }
}

/// Captures outbound mail for assertions; can inject transport
/// failures for the first N sends.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutboundMail>>,
    failures_remaining: AtomicU32,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` send attempts with a transport error.
    pub fn fail_times(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<OutboundMail> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_mail(&self, mail: &OutboundMail) -> Result<(), TransportError> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError("injected failure".to_string()));
        }
        self.sent.lock().await.push(mail.clone());
        Ok(())
    }
}
