use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use drip_core::types::ContactSource;
use drip_core::{DripError, DripResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest delay a step may wait after its reference time (ten years).
pub const MAX_STEP_DELAY_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// A contact who can receive sequence emails. Never hard-deleted; an
/// unsubscribe flips `active` off instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSubscriber {
    pub id: Uuid,
    /// Normalized (trimmed, lowercase). Unique across subscribers.
    pub email: String,
    pub name: String,
    pub source: ContactSource,
    pub details: SourceDetails,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl EmailSubscriber {
    /// Variables available to subject and body templates.
    pub fn template_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("email".to_string(), self.email.clone());
        vars.insert("name".to_string(), self.name.clone());
        let first_name = self.name.split_whitespace().next().unwrap_or_default();
        vars.insert("first_name".to_string(), first_name.to_string());
        vars.insert("source".to_string(), self.source.tag().to_string());
        vars.extend(self.details.template_variables());
        vars
    }
}

/// Source-specific metadata captured with the contact event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "source")]
pub enum SourceDetails {
    LeadMagnet {
        magnet: String,
        download_url: Option<String>,
    },
    Waitlist {
        product: String,
        referral_code: Option<String>,
        position: Option<u32>,
    },
    Corporate {
        company: String,
        team_size: Option<u32>,
        message: Option<String>,
    },
}

impl SourceDetails {
    pub fn source(&self) -> ContactSource {
        match self {
            SourceDetails::LeadMagnet { .. } => ContactSource::LeadMagnet,
            SourceDetails::Waitlist { .. } => ContactSource::Waitlist,
            SourceDetails::Corporate { .. } => ContactSource::Corporate,
        }
    }

    fn template_variables(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        match self {
            SourceDetails::LeadMagnet {
                magnet,
                download_url,
            } => {
                vars.insert("magnet".to_string(), magnet.clone());
                if let Some(url) = download_url {
                    vars.insert("download_url".to_string(), url.clone());
                }
            }
            SourceDetails::Waitlist {
                product,
                referral_code,
                position,
            } => {
                vars.insert("product".to_string(), product.clone());
                if let Some(code) = referral_code {
                    vars.insert("referral_code".to_string(), code.clone());
                }
                if let Some(position) = position {
                    vars.insert("position".to_string(), position.to_string());
                }
            }
            SourceDetails::Corporate {
                company,
                team_size,
                message: _,
            } => {
                vars.insert("company".to_string(), company.clone());
                if let Some(size) = team_size {
                    vars.insert("team_size".to_string(), size.to_string());
                }
            }
        }
        vars
    }
}

/// An inbound contact event from one of the capture surfaces (download form,
/// waitlist page, corporate inquiry form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEvent {
    pub email: String,
    pub name: String,
    pub details: SourceDetails,
}

impl ContactEvent {
    pub fn source(&self) -> ContactSource {
        self.details.source()
    }
}

/// A drip campaign template: an ordered list of timed email steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailSequence {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub source: ContactSource,
    pub active: bool,
    pub steps: Vec<SequenceEmail>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
}

impl EmailSequence {
    pub fn new(name: impl Into<String>, source: ContactSource, steps: Vec<SequenceEmail>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            source,
            active: true,
            steps,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    pub fn step(&self, index: u32) -> Option<&SequenceEmail> {
        self.steps.get(index as usize)
    }

    pub fn len(&self) -> u32 {
        self.steps.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step indices must be contiguous from 0, in order.
    pub fn validate(&self) -> DripResult<()> {
        if self.steps.is_empty() {
            return Err(DripError::InvalidSequence(format!(
                "sequence '{}' has no steps",
                self.name
            )));
        }
        for (position, step) in self.steps.iter().enumerate() {
            if step.step_index as usize != position {
                return Err(DripError::InvalidSequence(format!(
                    "sequence '{}' step at position {} has index {}",
                    self.name, position, step.step_index
                )));
            }
            if step.delay_secs > MAX_STEP_DELAY_SECS {
                return Err(DripError::InvalidSequence(format!(
                    "sequence '{}' step {} delay of {}s exceeds {}s",
                    self.name, step.step_index, step.delay_secs, MAX_STEP_DELAY_SECS
                )));
            }
        }
        Ok(())
    }
}

/// One step of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceEmail {
    pub id: Uuid,
    pub step_index: u32,
    /// Delay after enrollment (step 0) or after the previous step was sent.
    pub delay_secs: u64,
    pub subject: String,
    pub html_body: String,
}

impl SequenceEmail {
    pub fn new(
        step_index: u32,
        delay: Duration,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_index,
            delay_secs: delay.num_seconds().max(0) as u64,
            subject: subject.into(),
            html_body: html_body.into(),
        }
    }

    /// `None` when the stored delay does not fit a `Duration`.
    pub fn delay(&self) -> Option<Duration> {
        i64::try_from(self.delay_secs)
            .ok()
            .and_then(Duration::try_seconds)
    }
}

/// Progress status of an enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Unsubscribed,
    /// Retry budget for a step exhausted.
    Abandoned,
}

impl EnrollmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EnrollmentStatus::Completed | EnrollmentStatus::Unsubscribed | EnrollmentStatus::Abandoned
        )
    }
}

/// A subscriber's progress through one sequence. Unique per
/// (subscriber, sequence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEnrollment {
    pub id: Uuid,
    pub subscriber_id: Uuid,
    pub sequence_id: Uuid,
    pub current_step: u32,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub last_step_sent_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SequenceEnrollment {
    pub fn new(subscriber_id: Uuid, sequence_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscriber_id,
            sequence_id,
            current_step: 0,
            status: EnrollmentStatus::Active,
            enrolled_at: now,
            last_step_sent_at: None,
            updated_at: now,
        }
    }

    /// The instant the current step's delay is measured from.
    pub fn reference_time(&self) -> DateTime<Utc> {
        if self.current_step == 0 {
            self.enrolled_at
        } else {
            self.last_step_sent_at.unwrap_or(self.enrolled_at)
        }
    }
}

/// Dedup key: one dispatch record per (enrollment, step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DispatchKey {
    pub enrollment_id: Uuid,
    pub step_index: u32,
}

impl DispatchKey {
    pub fn new(enrollment_id: Uuid, step_index: u32) -> Self {
        Self {
            enrollment_id,
            step_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledStatus {
    Pending,
    Sent,
    Failed,
}

/// The dispatch record for one (enrollment, step). Reused across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEmail {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub step_index: u32,
    pub recipient: String,
    pub subject: String,
    pub status: ScheduledStatus,
    pub attempts: u32,
    pub scheduled_for: DateTime<Utc>,
    /// Set while an attempt is in flight.
    pub claimed_at: Option<DateTime<Utc>>,
    pub last_attempt_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
}

impl ScheduledEmail {
    pub fn key(&self) -> DispatchKey {
        DispatchKey::new(self.enrollment_id, self.step_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    Sent,
    Failed,
    Opened,
    Clicked,
}

/// Append-only delivery/engagement event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailAnalytics {
    pub id: Uuid,
    pub scheduled_email_id: Uuid,
    pub enrollment_id: Uuid,
    pub step_index: u32,
    pub event_type: AnalyticsEventType,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// A step whose delay has elapsed and which has not been sent yet.
#[derive(Debug, Clone)]
pub struct DueStep {
    pub enrollment: SequenceEnrollment,
    pub step: SequenceEmail,
    pub due_at: DateTime<Utc>,
}

impl DueStep {
    pub fn key(&self) -> DispatchKey {
        DispatchKey::new(self.enrollment.id, self.step.step_index)
    }
}

/// Aggregate statistics for a sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceStats {
    pub sequence_id: Uuid,
    pub enrolled: u64,
    pub active: u64,
    pub paused: u64,
    pub completed: u64,
    pub unsubscribed: u64,
    pub abandoned: u64,
    pub sent: u64,
    pub failed: u64,
    pub opened: u64,
    pub clicked: u64,
    pub unique_opens: u64,
    pub unique_clicks: u64,
    pub open_rate: f64,
    pub click_rate: f64,
}
