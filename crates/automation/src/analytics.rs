//! Analytics recorder — append-only delivery and engagement log.
//!
//! Recording never fails the caller: a delivery that succeeded stays
//! succeeded whatever happens here.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use drip_core::event_bus::{make_event, noop_sink, EventSink};
use drip_core::types::EventType;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::store::AutomationStore;
use crate::types::{
    AnalyticsEventType, EmailAnalytics, EnrollmentStatus, ScheduledEmail, ScheduledStatus,
    SequenceStats,
};

#[derive(Clone)]
pub struct AnalyticsRecorder {
    store: Arc<AutomationStore>,
    event_sink: Arc<dyn EventSink>,
}

impl AnalyticsRecorder {
    pub fn new(store: Arc<AutomationStore>) -> Self {
        Self {
            store,
            event_sink: noop_sink(),
        }
    }

    /// Attach an event sink that receives a copy of every recorded event.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn record(
        &self,
        scheduled: &ScheduledEmail,
        event_type: AnalyticsEventType,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) {
        let event = EmailAnalytics {
            id: Uuid::new_v4(),
            scheduled_email_id: scheduled.id,
            enrollment_id: scheduled.enrollment_id,
            step_index: scheduled.step_index,
            event_type,
            detail,
            occurred_at: at,
        };
        debug!(
            scheduled_email_id = %scheduled.id,
            event = ?event_type,
            "Recording email analytics"
        );

        let mut bus_event = make_event(
            bus_event_type(event_type),
            Some(event.enrollment_id),
            None,
            Some(event.step_index),
        );
        bus_event.scheduled_email_id = Some(event.scheduled_email_id);
        bus_event.detail = event.detail.clone();
        bus_event.timestamp = at;

        self.store.append_analytics(event);
        self.event_sink.emit(bus_event);
    }

    /// Record an open or click reported by the provider. Only delivered
    /// messages accept engagement; returns whether the event was recorded.
    pub fn record_engagement(
        &self,
        scheduled_email_id: &Uuid,
        event_type: AnalyticsEventType,
        detail: Option<String>,
        at: DateTime<Utc>,
    ) -> bool {
        if !matches!(event_type, AnalyticsEventType::Opened | AnalyticsEventType::Clicked) {
            warn!(event = ?event_type, "Engagement must be an open or a click");
            return false;
        }

        match self.store.scheduled_email_by_id(scheduled_email_id) {
            Some(scheduled) if scheduled.status == ScheduledStatus::Sent => {
                self.record(&scheduled, event_type, detail, at);
                true
            }
            Some(_) => {
                warn!(scheduled_email_id = %scheduled_email_id, "Engagement for undelivered email ignored");
                false
            }
            None => {
                warn!(scheduled_email_id = %scheduled_email_id, "Engagement for unknown email ignored");
                false
            }
        }
    }

    pub fn events_for_enrollment(&self, enrollment_id: &Uuid) -> Vec<EmailAnalytics> {
        self.store
            .analytics_where(|e| e.enrollment_id == *enrollment_id)
    }

    pub fn events_of_type(&self, event_type: AnalyticsEventType) -> Vec<EmailAnalytics> {
        self.store.analytics_where(|e| e.event_type == event_type)
    }

    /// Aggregate enrollment and delivery statistics for one sequence. Rates
    /// are unique opens/clicks per sent email.
    pub fn sequence_stats(&self, sequence_id: &Uuid) -> SequenceStats {
        let mut stats = SequenceStats {
            sequence_id: *sequence_id,
            ..Default::default()
        };

        let enrollments = self.store.enrollments_for_sequence(sequence_id);
        let mut enrollment_ids = HashSet::with_capacity(enrollments.len());
        for enrollment in &enrollments {
            enrollment_ids.insert(enrollment.id);
            stats.enrolled += 1;
            match enrollment.status {
                EnrollmentStatus::Active => stats.active += 1,
                EnrollmentStatus::Paused => stats.paused += 1,
                EnrollmentStatus::Completed => stats.completed += 1,
                EnrollmentStatus::Unsubscribed => stats.unsubscribed += 1,
                EnrollmentStatus::Abandoned => stats.abandoned += 1,
            }
        }

        let mut opened_emails = HashSet::new();
        let mut clicked_emails = HashSet::new();
        for event in self
            .store
            .analytics_where(|e| enrollment_ids.contains(&e.enrollment_id))
        {
            match event.event_type {
                AnalyticsEventType::Sent => stats.sent += 1,
                AnalyticsEventType::Failed => stats.failed += 1,
                AnalyticsEventType::Opened => {
                    stats.opened += 1;
                    opened_emails.insert(event.scheduled_email_id);
                }
                AnalyticsEventType::Clicked => {
                    stats.clicked += 1;
                    clicked_emails.insert(event.scheduled_email_id);
                }
            }
        }

        stats.unique_opens = opened_emails.len() as u64;
        stats.unique_clicks = clicked_emails.len() as u64;
        if stats.sent > 0 {
            let sent = stats.sent as f64;
            stats.open_rate = stats.unique_opens as f64 / sent;
            stats.click_rate = stats.unique_clicks as f64 / sent;
        }
        stats
    }
}

fn bus_event_type(event_type: AnalyticsEventType) -> EventType {
    match event_type {
        AnalyticsEventType::Sent => EventType::EmailSent,
        AnalyticsEventType::Failed => EventType::EmailFailed,
        AnalyticsEventType::Opened => EventType::EmailOpened,
        AnalyticsEventType::Clicked => EventType::EmailClicked,
    }
}
