use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of contact event that brings a subscriber in. Each source routes
/// to at most one drip sequence.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContactSource {
    LeadMagnet,
    Waitlist,
    Corporate,
}

impl ContactSource {
    pub fn display_name(&self) -> &'static str {
        match self {
            ContactSource::LeadMagnet => "Lead Magnet",
            ContactSource::Waitlist => "Waitlist",
            ContactSource::Corporate => "Corporate Inquiry",
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            ContactSource::LeadMagnet => "lead_magnet",
            ContactSource::Waitlist => "waitlist",
            ContactSource::Corporate => "corporate",
        }
    }
}

/// Analytics event forwarded to the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub enrollment_id: Option<Uuid>,
    pub subscriber_id: Option<Uuid>,
    pub scheduled_email_id: Option<Uuid>,
    pub step_index: Option<u32>,
    pub detail: Option<String>,
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Subscriber lifecycle
    SubscriberCreated,
    SubscriberDeactivated,
    // Enrollment lifecycle
    EnrollmentCreated,
    EnrollmentPaused,
    EnrollmentResumed,
    EnrollmentCompleted,
    EnrollmentUnsubscribed,
    EnrollmentAbandoned,
    // Delivery
    EmailSent,
    EmailFailed,
    EmailOpened,
    EmailClicked,
    // Trigger
    RunCompleted,
    RunSkipped,
}
