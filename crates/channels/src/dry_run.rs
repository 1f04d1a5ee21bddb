//! Transport that logs messages instead of sending them. Used when no
//! provider is configured.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use drip_automation::transport::{EmailTransport, OutboundEmail, TransportError, TransportReceipt};
use tracing::info;

#[derive(Debug, Default)]
pub struct DryRunTransport {
    delivered: AtomicU64,
}

impl DryRunTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmailTransport for DryRunTransport {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<TransportReceipt, TransportError> {
        info!(
            scheduled_email_id = %email.scheduled_email_id,
            to = %email.to_address,
            subject = %email.subject,
            step_index = email.step_index,
            "Dry run, email not sent"
        );
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(TransportReceipt {
            provider_message_id: Some(format!("dry-{}", email.scheduled_email_id)),
        })
    }
}
