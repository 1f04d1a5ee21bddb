//! SendGrid event webhook ingestion.
//!
//! Open and click events are attributed through the `scheduled_email_id`
//! custom arg set at send time. Unsubscribe and spam-report events stop every
//! live enrollment of the address.

use chrono::{DateTime, Utc};
use drip_automation::types::AnalyticsEventType;
use drip_automation::{AnalyticsRecorder, EnrollmentManager};
use drip_core::DripResult;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SendGridEventType {
    Processed,
    Dropped,
    Delivered,
    Deferred,
    Bounce,
    Open,
    Click,
    #[serde(rename = "spamreport")]
    SpamReport,
    Unsubscribe,
    GroupUnsubscribe,
    GroupResubscribe,
    #[serde(other)]
    Unknown,
}

/// One entry of a webhook batch. Custom args arrive as top-level fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendGridEvent {
    pub email: String,
    pub event: SendGridEventType,
    /// Unix seconds.
    pub timestamp: i64,
    #[serde(default)]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub scheduled_email_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl SendGridEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.timestamp, 0).unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WebhookSummary {
    pub recorded: usize,
    pub unsubscribed: usize,
    pub ignored: usize,
}

#[derive(Clone)]
pub struct SendGridWebhook {
    analytics: AnalyticsRecorder,
    enrollments: EnrollmentManager,
}

impl SendGridWebhook {
    pub fn new(analytics: AnalyticsRecorder, enrollments: EnrollmentManager) -> Self {
        Self {
            analytics,
            enrollments,
        }
    }

    /// Parse a raw webhook POST body (a JSON array of events).
    pub fn parse_batch(body: &[u8]) -> DripResult<Vec<SendGridEvent>> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn process(&self, events: &[SendGridEvent]) -> WebhookSummary {
        let mut summary = WebhookSummary::default();
        for event in events {
            metrics::counter!(
                "sendgrid.webhook_events",
                "type" => format!("{:?}", event.event)
            )
            .increment(1);

            match event.event {
                SendGridEventType::Open => {
                    self.engagement(event, AnalyticsEventType::Opened, &mut summary)
                }
                SendGridEventType::Click => {
                    self.engagement(event, AnalyticsEventType::Clicked, &mut summary)
                }
                SendGridEventType::Unsubscribe
                | SendGridEventType::GroupUnsubscribe
                | SendGridEventType::SpamReport => {
                    match self.enrollments.unsubscribe_email(&event.email) {
                        Ok(changed) => summary.unsubscribed += changed,
                        Err(e) => {
                            warn!(email = %event.email, error = %e, "Webhook unsubscribe failed");
                            summary.ignored += 1;
                        }
                    }
                }
                other => {
                    debug!(event = ?other, email = %event.email, "Webhook event not tracked");
                    summary.ignored += 1;
                }
            }
        }
        summary
    }

    fn engagement(
        &self,
        event: &SendGridEvent,
        event_type: AnalyticsEventType,
        summary: &mut WebhookSummary,
    ) {
        let Some(id) = event
            .scheduled_email_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw).ok())
        else {
            warn!(email = %event.email, "Webhook event missing scheduled_email_id, skipping");
            summary.ignored += 1;
            return;
        };

        if self
            .analytics
            .record_engagement(&id, event_type, event.url.clone(), event.occurred_at())
        {
            summary.recorded += 1;
        } else {
            summary.ignored += 1;
        }
    }
}
