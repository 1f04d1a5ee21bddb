//! Outbound email adapters and provider webhook ingestion.
//!
//! Transports: SendGrid v3 mail-send over HTTPS, and a dry-run transport
//! that only logs. Webhooks: SendGrid event batches mapped back onto the
//! automation analytics and unsubscribe flows.

pub mod dry_run;
pub mod email;
pub mod webhook;

pub use dry_run::DryRunTransport;
pub use email::SendGridTransport;
pub use webhook::{SendGridEvent, SendGridEventType, SendGridWebhook, WebhookSummary};
