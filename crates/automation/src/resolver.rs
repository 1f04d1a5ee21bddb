//! Due-step resolution — decides, for a given instant, which enrollments
//! have a step ready to send.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use drip_core::event_bus::{make_event, noop_sink, EventSink};
use drip_core::types::EventType;
use tracing::{debug, info, warn};

use crate::store::AutomationStore;
use crate::types::{DispatchKey, DueStep, EnrollmentStatus, ScheduledStatus};

#[derive(Clone)]
pub struct DueStepResolver {
    store: Arc<AutomationStore>,
    event_sink: Arc<dyn EventSink>,
}

impl DueStepResolver {
    pub fn new(store: Arc<AutomationStore>) -> Self {
        Self {
            store,
            event_sink: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Every active enrollment whose current step's delay has elapsed at
    /// `now` and which has no sent record for that step.
    ///
    /// The step's delay is measured from enrollment for step 0 and from the
    /// previous send otherwise. Enrollments that have run past the end of
    /// their sequence are completed here instead of being returned, and an
    /// enrollment whose step was sent but not advanced is repaired.
    pub fn find_due(&self, now: DateTime<Utc>) -> Vec<DueStep> {
        let mut due = Vec::new();

        for enrollment in self.store.enrollments_with_status(EnrollmentStatus::Active) {
            let Some(sequence) = self.store.get_sequence(&enrollment.sequence_id) else {
                warn!(
                    enrollment_id = %enrollment.id,
                    sequence_id = %enrollment.sequence_id,
                    "Enrollment references a missing sequence"
                );
                self.complete(&enrollment.id, now);
                continue;
            };

            let Some(step) = sequence.step(enrollment.current_step).cloned() else {
                self.complete(&enrollment.id, now);
                continue;
            };

            let key = DispatchKey::new(enrollment.id, step.step_index);
            if let Some(existing) = self.store.scheduled_email(&key) {
                if existing.status == ScheduledStatus::Sent {
                    match self.store.reconcile_sent(key, sequence.len()) {
                        Ok(Some(repaired)) => info!(
                            enrollment_id = %repaired.id,
                            current_step = repaired.current_step,
                            "Advanced enrollment past an already sent step"
                        ),
                        Ok(None) => {}
                        Err(e) => warn!(enrollment_id = %enrollment.id, error = %e, "Reconcile failed"),
                    }
                    continue;
                }
            }

            let Some(due_at) = step
                .delay()
                .and_then(|delay| enrollment.reference_time().checked_add_signed(delay))
            else {
                warn!(
                    enrollment_id = %enrollment.id,
                    step_index = step.step_index,
                    delay_secs = step.delay_secs,
                    "Step delay overflows the calendar, completing enrollment"
                );
                self.complete(&enrollment.id, now);
                continue;
            };
            if due_at > now {
                continue;
            }

            debug!(
                enrollment_id = %enrollment.id,
                step_index = step.step_index,
                due_at = %due_at,
                "Step due"
            );
            due.push(DueStep {
                enrollment,
                step,
                due_at,
            });
        }

        due.sort_by_key(|d| d.due_at);
        due
    }

    fn complete(&self, enrollment_id: &uuid::Uuid, now: DateTime<Utc>) {
        let completed = self.store.update_enrollment(enrollment_id, |enrollment| {
            if !self
                .store
                .state_machine()
                .can_transition(enrollment.status, EnrollmentStatus::Completed)
            {
                return Ok(None);
            }
            enrollment.status = EnrollmentStatus::Completed;
            enrollment.updated_at = now;
            Ok(Some(enrollment.subscriber_id))
        });

        if let Ok(Some(subscriber_id)) = completed {
            info!(enrollment_id = %enrollment_id, "Enrollment completed");
            self.event_sink.emit(make_event(
                EventType::EnrollmentCompleted,
                Some(*enrollment_id),
                Some(subscriber_id),
                None,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EmailSequence, SequenceEmail, SequenceEnrollment};
    use chrono::{Duration, TimeZone};
    use drip_core::types::ContactSource;

    fn setup() -> (Arc<AutomationStore>, DueStepResolver, SequenceEnrollment, DateTime<Utc>) {
        let store = Arc::new(AutomationStore::new());
        let sequence = EmailSequence::new(
            "Welcome",
            ContactSource::LeadMagnet,
            vec![
                SequenceEmail::new(0, Duration::zero(), "Welcome", "<p>Hi</p>"),
                SequenceEmail::new(1, Duration::hours(24), "Day one", "<p>Tips</p>"),
            ],
        );
        let sequence_id = sequence.id;
        store.insert_sequence(sequence);

        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let (enrollment, _) = store
            .insert_enrollment_if_absent(SequenceEnrollment::new(uuid::Uuid::new_v4(), sequence_id, t0))
            .unwrap();
        let resolver = DueStepResolver::new(store.clone());
        (store, resolver, enrollment, t0)
    }

    fn send(store: &AutomationStore, key: DispatchKey, at: DateTime<Utc>) {
        store.claim_dispatch(key, "a@b.c", "s", at, at, Duration::minutes(15));
        store.commit_sent(key, at, None, 2).unwrap();
    }

    #[test]
    fn test_first_step_due_immediately() {
        let (_, resolver, enrollment, t0) = setup();
        let due = resolver.find_due(t0);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].enrollment.id, enrollment.id);
        assert_eq!(due[0].step.step_index, 0);
        assert_eq!(due[0].due_at, t0);
    }

    #[test]
    fn test_second_step_waits_for_delay_from_previous_send() {
        let (store, resolver, enrollment, t0) = setup();
        send(&store, DispatchKey::new(enrollment.id, 0), t0);

        assert!(resolver.find_due(t0 + Duration::hours(23)).is_empty());
        let due = resolver.find_due(t0 + Duration::hours(24));
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].step.step_index, 1);

        send(&store, DispatchKey::new(enrollment.id, 1), t0 + Duration::hours(24));
        assert!(resolver.find_due(t0 + Duration::days(30)).is_empty());
        assert_eq!(
            store.get_enrollment(&enrollment.id).unwrap().status,
            EnrollmentStatus::Completed
        );
    }

    #[test]
    fn test_paused_and_terminal_enrollments_are_skipped() {
        let (store, resolver, enrollment, t0) = setup();
        store
            .update_enrollment(&enrollment.id, |e| {
                e.status = EnrollmentStatus::Paused;
                Ok(())
            })
            .unwrap();
        assert!(resolver.find_due(t0 + Duration::days(1)).is_empty());

        store
            .update_enrollment(&enrollment.id, |e| {
                e.status = EnrollmentStatus::Unsubscribed;
                Ok(())
            })
            .unwrap();
        assert!(resolver.find_due(t0 + Duration::days(1)).is_empty());
    }

    #[test]
    fn test_sent_but_not_advanced_is_reconciled() {
        let (store, resolver, enrollment, t0) = setup();
        let key = DispatchKey::new(enrollment.id, 0);
        send(&store, key, t0);
        // Simulate a crash that lost the advance.
        store
            .update_enrollment(&enrollment.id, |e| {
                e.current_step = 0;
                e.last_step_sent_at = None;
                Ok(())
            })
            .unwrap();

        assert!(resolver.find_due(t0 + Duration::hours(1)).is_empty());
        let repaired = store.get_enrollment(&enrollment.id).unwrap();
        assert_eq!(repaired.current_step, 1);
        assert_eq!(repaired.last_step_sent_at, Some(t0));
    }

    #[test]
    fn test_overflowing_delay_completes_only_that_enrollment() {
        let (store, resolver, healthy, t0) = setup();
        // Inserted directly: registration would reject this delay.
        let broken = EmailSequence::new(
            "Broken",
            ContactSource::Waitlist,
            vec![SequenceEmail::new(0, Duration::days(100_000_000), "Later", "<p>...</p>")],
        );
        let broken_id = broken.id;
        store.insert_sequence(broken);
        let (stuck, _) = store
            .insert_enrollment_if_absent(SequenceEnrollment::new(uuid::Uuid::new_v4(), broken_id, t0))
            .unwrap();

        let due = resolver.find_due(t0);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].enrollment.id, healthy.id);
        assert_eq!(
            store.get_enrollment(&stuck.id).unwrap().status,
            EnrollmentStatus::Completed
        );
    }

    #[test]
    fn test_missing_sequence_completes_enrollment() {
        let store = Arc::new(AutomationStore::new());
        let now = Utc::now();
        let (enrollment, _) = store
            .insert_enrollment_if_absent(SequenceEnrollment::new(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), now))
            .unwrap();
        let resolver = DueStepResolver::new(store.clone());
        assert!(resolver.find_due(now).is_empty());
        assert_eq!(
            store.get_enrollment(&enrollment.id).unwrap().status,
            EnrollmentStatus::Completed
        );
    }
}
