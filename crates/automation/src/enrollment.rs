//! Enrollment manager — creates and transitions subscriber enrollments.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use drip_core::event_bus::{make_event, noop_sink, EventSink};
use drip_core::types::EventType;
use drip_core::{DripError, DripResult};
use tracing::{debug, info};
use uuid::Uuid;

use crate::sequences::SequenceCatalog;
use crate::store::AutomationStore;
use crate::types::{ContactEvent, EnrollmentStatus, SequenceEnrollment};

#[derive(Clone)]
pub struct EnrollmentManager {
    store: Arc<AutomationStore>,
    catalog: SequenceCatalog,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for EnrollmentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrollmentManager")
            .field("enrollments", &self.store.enrollment_count())
            .finish()
    }
}

impl EnrollmentManager {
    pub fn new(store: Arc<AutomationStore>) -> Self {
        Self {
            catalog: SequenceCatalog::new(store.clone()),
            store,
            event_sink: noop_sink(),
        }
    }

    /// Attach an event sink for emitting lifecycle events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Enroll a subscriber into a sequence now.
    pub fn enroll(&self, subscriber_id: &Uuid, sequence_id: &Uuid) -> DripResult<SequenceEnrollment> {
        self.enroll_at(subscriber_id, sequence_id, Utc::now())
    }

    /// Idempotent: an existing enrollment for the pair is returned unchanged,
    /// whatever its status.
    pub fn enroll_at(
        &self,
        subscriber_id: &Uuid,
        sequence_id: &Uuid,
        now: DateTime<Utc>,
    ) -> DripResult<SequenceEnrollment> {
        if let Some(existing) = self.store.find_enrollment(subscriber_id, sequence_id) {
            debug!(enrollment_id = %existing.id, "Enrollment already exists");
            return Ok(existing);
        }

        let subscriber = self
            .store
            .get_subscriber(subscriber_id)
            .ok_or_else(|| DripError::NotFound(format!("subscriber {}", subscriber_id)))?;
        if !subscriber.active {
            return Err(DripError::SubscriberInactive(subscriber.email));
        }

        let sequence = self
            .store
            .get_sequence(sequence_id)
            .ok_or_else(|| DripError::NotFound(format!("sequence {}", sequence_id)))?;
        if !sequence.active {
            return Err(DripError::InvalidSequence(format!(
                "sequence '{}' is not accepting enrollments",
                sequence.name
            )));
        }

        let (enrollment, created) = self
            .store
            .insert_enrollment_if_absent(SequenceEnrollment::new(*subscriber_id, *sequence_id, now))?;

        if created {
            info!(
                enrollment_id = %enrollment.id,
                subscriber_id = %subscriber_id,
                sequence = %sequence.name,
                "Subscriber enrolled"
            );
            self.event_sink.emit(make_event(
                EventType::EnrollmentCreated,
                Some(enrollment.id),
                Some(*subscriber_id),
                Some(0),
            ));
        }
        Ok(enrollment)
    }

    pub fn handle_contact_event(&self, event: &ContactEvent) -> DripResult<Option<SequenceEnrollment>> {
        self.handle_contact_event_at(event, Utc::now())
    }

    /// Entry point for capture surfaces: upsert the subscriber, then enroll
    /// into the sequence routed for the event's source. `None` when no active
    /// sequence is routed or the subscriber has unsubscribed.
    pub fn handle_contact_event_at(
        &self,
        event: &ContactEvent,
        now: DateTime<Utc>,
    ) -> DripResult<Option<SequenceEnrollment>> {
        let (subscriber, created) = self.store.upsert_subscriber(event, now)?;
        if created {
            self.event_sink.emit(make_event(
                EventType::SubscriberCreated,
                None,
                Some(subscriber.id),
                None,
            ));
        }

        if !subscriber.active {
            info!(
                subscriber_id = %subscriber.id,
                "Contact event from unsubscribed address, not enrolling"
            );
            return Ok(None);
        }

        let Some(sequence) = self.catalog.sequence_for_source(event.source()) else {
            info!(
                source = event.source().tag(),
                "No active sequence routed for source"
            );
            return Ok(None);
        };

        self.enroll_at(&subscriber.id, &sequence.id, now).map(Some)
    }

    pub fn unsubscribe(&self, subscriber_id: &Uuid) -> DripResult<usize> {
        self.unsubscribe_at(subscriber_id, Utc::now())
    }

    /// Terminal: every live (active or paused) enrollment of the subscriber
    /// becomes unsubscribed, and the subscriber is deactivated. Returns the
    /// number of enrollments changed.
    pub fn unsubscribe_at(&self, subscriber_id: &Uuid, now: DateTime<Utc>) -> DripResult<usize> {
        if self.store.deactivate_subscriber(subscriber_id, now)? {
            self.event_sink.emit(make_event(
                EventType::SubscriberDeactivated,
                None,
                Some(*subscriber_id),
                None,
            ));
        }

        let mut changed = 0;
        for enrollment in self.store.enrollments_for_subscriber(subscriber_id) {
            let updated = self.store.update_enrollment(&enrollment.id, |e| {
                if !self
                    .store
                    .state_machine()
                    .can_transition(e.status, EnrollmentStatus::Unsubscribed)
                {
                    return Ok(false);
                }
                e.status = EnrollmentStatus::Unsubscribed;
                e.updated_at = now;
                Ok(true)
            })?;

            if updated {
                changed += 1;
                self.event_sink.emit(make_event(
                    EventType::EnrollmentUnsubscribed,
                    Some(enrollment.id),
                    Some(*subscriber_id),
                    None,
                ));
            }
        }

        info!(subscriber_id = %subscriber_id, enrollments = changed, "Subscriber unsubscribed");
        Ok(changed)
    }

    /// Unsubscribe by address, as delivered by an unsubscribe link.
    pub fn unsubscribe_email(&self, email: &str) -> DripResult<usize> {
        let subscriber = self
            .store
            .find_subscriber_by_email(email)
            .ok_or_else(|| DripError::NotFound(format!("subscriber {}", email)))?;
        self.unsubscribe(&subscriber.id)
    }

    pub fn pause(&self, enrollment_id: &Uuid) -> DripResult<SequenceEnrollment> {
        self.transition(enrollment_id, EnrollmentStatus::Paused, EventType::EnrollmentPaused)
    }

    /// Resumed enrollments keep their reference time, so a step whose delay
    /// elapsed while paused is due on the next run.
    pub fn resume(&self, enrollment_id: &Uuid) -> DripResult<SequenceEnrollment> {
        self.transition(enrollment_id, EnrollmentStatus::Active, EventType::EnrollmentResumed)
    }

    pub fn get_enrollment(&self, enrollment_id: &Uuid) -> Option<SequenceEnrollment> {
        self.store.get_enrollment(enrollment_id)
    }

    pub fn enrollments_for(&self, subscriber_id: &Uuid) -> Vec<SequenceEnrollment> {
        self.store.enrollments_for_subscriber(subscriber_id)
    }

    fn transition(
        &self,
        enrollment_id: &Uuid,
        to: EnrollmentStatus,
        event_type: EventType,
    ) -> DripResult<SequenceEnrollment> {
        let enrollment = self.store.update_enrollment(enrollment_id, |e| {
            self.store.state_machine().check(e.status, to)?;
            e.status = to;
            e.updated_at = Utc::now();
            Ok(e.clone())
        })?;

        info!(enrollment_id = %enrollment_id, status = ?to, "Enrollment status changed");
        self.event_sink.emit(make_event(
            event_type,
            Some(enrollment.id),
            Some(enrollment.subscriber_id),
            Some(enrollment.current_step),
        ));
        Ok(enrollment)
    }
}
