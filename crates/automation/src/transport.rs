//! The outbound email capability the dispatcher depends on.
//!
//! The engine only cares whether a send succeeded; any error is treated as
//! retryable on the next run.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// A fully rendered message ready for the provider.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEmail {
    pub scheduled_email_id: Uuid,
    pub enrollment_id: Uuid,
    pub step_index: u32,
    pub to_address: String,
    pub to_name: String,
    pub subject: String,
    pub html_body: String,
}

#[derive(Debug, Clone, Default)]
pub struct TransportReceipt {
    pub provider_message_id: Option<String>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("provider rejected message: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("transport error: {0}")]
    Other(String),
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, email: &OutboundEmail) -> Result<TransportReceipt, TransportError>;
}

/// In-memory transport that records every attempt. Can be told to fail the
/// first N sends or every send to given addresses, and to take a while.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundEmail>>,
    attempts: AtomicUsize,
    fail_first: AtomicUsize,
    failing_addresses: Mutex<HashSet<String>>,
    latency: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` sends, then succeed.
    pub fn failing_first(n: usize) -> Self {
        let transport = Self::new();
        transport.fail_first.store(n, Ordering::SeqCst);
        transport
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn fail_address(&self, address: &str) {
        self.failing_addresses.lock().insert(address.to_lowercase());
    }

    pub fn heal_address(&self, address: &str) {
        self.failing_addresses.lock().remove(&address.to_lowercase());
    }

    /// Successfully delivered messages, in send order.
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<OutboundEmail> {
        self.sent
            .lock()
            .iter()
            .filter(|e| e.to_address == address)
            .cloned()
            .collect()
    }

    /// Every call to `send`, successful or not.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<TransportReceipt, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let scripted_failure = self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(TransportError::Other("scripted failure".to_string()));
        }
        if self
            .failing_addresses
            .lock()
            .contains(&email.to_address.to_lowercase())
        {
            return Err(TransportError::Rejected {
                status: 550,
                body: "mailbox unavailable".to_string(),
            });
        }

        self.sent.lock().push(email.clone());
        Ok(TransportReceipt {
            provider_message_id: Some(format!("rec-{}", Uuid::new_v4())),
        })
    }
}
