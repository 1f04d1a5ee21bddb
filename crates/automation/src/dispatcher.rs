//! Step dispatcher — renders a due step and delivers it through the
//! transport at most once per (enrollment, step).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use drip_core::config::DispatchConfig;
use drip_core::event_bus::{make_event, noop_sink, EventSink};
use drip_core::templates::render_message;
use drip_core::types::EventType;
use drip_core::{DripError, DripResult};
use tracing::{debug, info, warn};

use crate::analytics::AnalyticsRecorder;
use crate::store::{AutomationStore, ClaimOutcome};
use crate::transport::{EmailTransport, OutboundEmail};
use crate::types::{AnalyticsEventType, DueStep, EnrollmentStatus};

/// What happened to one due step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent { attempt: u32 },
    Failed {
        attempt: u32,
        reason: String,
        abandoned: bool,
    },
    /// A sent record already existed; nothing was delivered.
    AlreadySent,
    /// Another worker holds a live claim on the step.
    InFlight,
    Skipped(String),
}

#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<AutomationStore>,
    transport: Arc<dyn EmailTransport>,
    analytics: AnalyticsRecorder,
    max_attempts: u32,
    claim_lease: Duration,
    event_sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<AutomationStore>,
        transport: Arc<dyn EmailTransport>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            analytics: AnalyticsRecorder::new(store.clone()),
            store,
            transport,
            max_attempts: config.max_attempts.max(1),
            claim_lease: Duration::seconds(config.claim_lease_secs as i64),
            event_sink: noop_sink(),
        }
    }

    /// Attach an event sink; it is shared with the analytics recorder.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.analytics = self.analytics.with_event_sink(sink.clone());
        self.event_sink = sink;
        self
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Claim, render, send, then commit or record the failure.
    ///
    /// A transport error is not an `Err`: it comes back as
    /// [`DispatchOutcome::Failed`] and the step is retried on a later run.
    /// `Err` is reserved for store inconsistencies.
    pub async fn dispatch(&self, due: &DueStep, now: DateTime<Utc>) -> DripResult<DispatchOutcome> {
        let key = due.key();
        let subscriber = self
            .store
            .get_subscriber(&due.enrollment.subscriber_id)
            .ok_or_else(|| {
                DripError::Storage(format!(
                    "enrollment {} references missing subscriber {}",
                    due.enrollment.id, due.enrollment.subscriber_id
                ))
            })?;
        if !subscriber.active {
            return Ok(DispatchOutcome::Skipped("subscriber inactive".to_string()));
        }
        // The due step may be stale: the enrollment can be paused or
        // unsubscribed between resolution and dispatch.
        let live_status = self
            .store
            .get_enrollment(&key.enrollment_id)
            .map(|e| e.status)
            .ok_or_else(|| DripError::NotFound(format!("enrollment {}", key.enrollment_id)))?;
        if live_status != EnrollmentStatus::Active {
            return Ok(DispatchOutcome::Skipped(format!("enrollment {:?}", live_status)));
        }

        let sequence = self
            .store
            .get_sequence(&due.enrollment.sequence_id)
            .ok_or_else(|| DripError::NotFound(format!("sequence {}", due.enrollment.sequence_id)))?;

        let mut vars = subscriber.template_variables();
        vars.insert("sequence_name".to_string(), sequence.name.clone());
        let message = render_message(&due.step.subject, &due.step.html_body, &vars);

        let claimed = match self.store.claim_dispatch(
            key,
            &subscriber.email,
            &message.subject,
            due.due_at,
            now,
            self.claim_lease,
        ) {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::AlreadySent(_) => {
                debug!(enrollment_id = %key.enrollment_id, step_index = key.step_index, "Step already sent");
                return Ok(DispatchOutcome::AlreadySent);
            }
            ClaimOutcome::InFlight(_) => {
                debug!(enrollment_id = %key.enrollment_id, step_index = key.step_index, "Step in flight elsewhere");
                return Ok(DispatchOutcome::InFlight);
            }
        };

        let outbound = OutboundEmail {
            scheduled_email_id: claimed.id,
            enrollment_id: key.enrollment_id,
            step_index: key.step_index,
            to_address: subscriber.email.clone(),
            to_name: subscriber.name.clone(),
            subject: message.subject,
            html_body: message.html_body,
        };

        match self.transport.send(&outbound).await {
            Ok(receipt) => {
                let (sent, enrollment) =
                    self.store
                        .commit_sent(key, now, receipt.provider_message_id, sequence.len())?;
                self.analytics
                    .record(&sent, AnalyticsEventType::Sent, None, now);
                metrics::counter!("drip.emails_sent").increment(1);
                info!(
                    enrollment_id = %key.enrollment_id,
                    step_index = key.step_index,
                    attempt = sent.attempts,
                    transport = self.transport.name(),
                    "Sequence email sent"
                );

                if enrollment.status == EnrollmentStatus::Completed {
                    info!(enrollment_id = %enrollment.id, "Enrollment completed");
                    self.event_sink.emit(make_event(
                        EventType::EnrollmentCompleted,
                        Some(enrollment.id),
                        Some(enrollment.subscriber_id),
                        Some(key.step_index),
                    ));
                }
                Ok(DispatchOutcome::Sent {
                    attempt: sent.attempts,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                let failure = self
                    .store
                    .record_failure(key, now, &reason, self.max_attempts)?;
                self.analytics.record(
                    &failure.scheduled,
                    AnalyticsEventType::Failed,
                    Some(reason.clone()),
                    now,
                );
                metrics::counter!("drip.emails_failed").increment(1);
                warn!(
                    enrollment_id = %key.enrollment_id,
                    step_index = key.step_index,
                    attempt = failure.scheduled.attempts,
                    error = %reason,
                    "Sequence email failed"
                );

                if failure.abandoned {
                    warn!(
                        enrollment_id = %key.enrollment_id,
                        attempts = failure.scheduled.attempts,
                        "Enrollment abandoned after repeated failures"
                    );
                    self.event_sink.emit(make_event(
                        EventType::EnrollmentAbandoned,
                        Some(key.enrollment_id),
                        Some(subscriber.id),
                        Some(key.step_index),
                    ));
                }
                Ok(DispatchOutcome::Failed {
                    attempt: failure.scheduled.attempts,
                    reason,
                    abandoned: failure.abandoned,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use crate::types::{
        ContactEvent, DispatchKey, EmailSequence, ScheduledStatus, SequenceEmail,
        SequenceEnrollment, SourceDetails,
    };
    use drip_core::event_bus::capture_sink;
    use drip_core::types::ContactSource;

    struct Fixture {
        store: Arc<AutomationStore>,
        due: DueStep,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(AutomationStore::new());
        let now = Utc::now();
        let (subscriber, _) = store
            .upsert_subscriber(
                &ContactEvent {
                    email: "ada@example.com".to_string(),
                    name: "Ada Lovelace".to_string(),
                    details: SourceDetails::LeadMagnet {
                        magnet: "Rust Guide".to_string(),
                        download_url: None,
                    },
                },
                now,
            )
            .unwrap();
        let sequence = EmailSequence::new(
            "Guide follow-up",
            ContactSource::LeadMagnet,
            vec![
                SequenceEmail::new(0, Duration::zero(), "Your {{magnet}}", "<p>Hi {{first_name|there}}</p>"),
                SequenceEmail::new(1, Duration::days(2), "Next", "<p>More</p>"),
            ],
        );
        let step = sequence.steps[0].clone();
        let sequence_id = sequence.id;
        store.insert_sequence(sequence);
        let (enrollment, _) = store
            .insert_enrollment_if_absent(SequenceEnrollment::new(subscriber.id, sequence_id, now))
            .unwrap();
        Fixture {
            store,
            due: DueStep {
                enrollment,
                step,
                due_at: now,
            },
            now,
        }
    }

    fn dispatcher(store: &Arc<AutomationStore>, transport: Arc<RecordingTransport>, max_attempts: u32) -> Dispatcher {
        let config = DispatchConfig {
            max_attempts,
            ..Default::default()
        };
        Dispatcher::new(store.clone(), transport, &config)
    }

    #[tokio::test]
    async fn test_dispatch_renders_and_advances() {
        let f = fixture();
        let transport = Arc::new(RecordingTransport::new());
        let d = dispatcher(&f.store, transport.clone(), 5);

        let outcome = d.dispatch(&f.due, f.now).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Sent { attempt: 1 });

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Your Rust Guide");
        assert_eq!(sent[0].html_body, "<p>Hi Ada</p>");

        let enrollment = f.store.get_enrollment(&f.due.enrollment.id).unwrap();
        assert_eq!(enrollment.current_step, 1);
        assert_eq!(enrollment.last_step_sent_at, Some(f.now));
    }

    #[tokio::test]
    async fn test_failed_step_retries_on_next_run() {
        let f = fixture();
        let transport = Arc::new(RecordingTransport::failing_first(1));
        let d = dispatcher(&f.store, transport.clone(), 5);

        let first = d.dispatch(&f.due, f.now).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Failed { attempt: 1, abandoned: false, .. }));
        let enrollment = f.store.get_enrollment(&f.due.enrollment.id).unwrap();
        assert_eq!(enrollment.current_step, 0);

        let later = f.now + Duration::hours(1);
        let second = d.dispatch(&f.due, later).await.unwrap();
        assert_eq!(second, DispatchOutcome::Sent { attempt: 2 });

        let record = f.store.scheduled_email(&DispatchKey::new(f.due.enrollment.id, 0)).unwrap();
        assert_eq!(record.status, ScheduledStatus::Sent);
        assert_eq!(record.attempts, 2);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_sends_once() {
        let f = fixture();
        let transport = Arc::new(
            RecordingTransport::new().with_latency(std::time::Duration::from_millis(20)),
        );
        let d = dispatcher(&f.store, transport.clone(), 5);

        let (a, b) = tokio::join!(d.dispatch(&f.due, f.now), d.dispatch(&f.due, f.now));
        let outcomes = [a.unwrap(), b.unwrap()];
        assert_eq!(
            outcomes.iter().filter(|o| matches!(o, DispatchOutcome::Sent { .. })).count(),
            1
        );
        assert!(outcomes.contains(&DispatchOutcome::InFlight));
        assert_eq!(transport.sent().len(), 1);

        assert_eq!(d.dispatch(&f.due, f.now).await.unwrap(), DispatchOutcome::AlreadySent);
        assert_eq!(transport.attempt_count(), 1);
    }

    #[tokio::test]
    async fn test_abandons_after_max_attempts() {
        let f = fixture();
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_address("ada@example.com");
        let sink = capture_sink();
        let d = dispatcher(&f.store, transport, 2).with_event_sink(sink.clone());

        d.dispatch(&f.due, f.now).await.unwrap();
        let last = d.dispatch(&f.due, f.now).await.unwrap();
        assert!(matches!(last, DispatchOutcome::Failed { attempt: 2, abandoned: true, .. }));
        assert_eq!(
            f.store.get_enrollment(&f.due.enrollment.id).unwrap().status,
            EnrollmentStatus::Abandoned
        );
        assert_eq!(sink.count_type(EventType::EmailFailed), 2);
        assert_eq!(sink.count_type(EventType::EnrollmentAbandoned), 1);
    }

    #[tokio::test]
    async fn test_inactive_subscriber_skipped() {
        let f = fixture();
        f.store
            .deactivate_subscriber(&f.due.enrollment.subscriber_id, f.now)
            .unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let d = dispatcher(&f.store, transport.clone(), 5);

        assert!(matches!(
            d.dispatch(&f.due, f.now).await.unwrap(),
            DispatchOutcome::Skipped(_)
        ));
        assert_eq!(transport.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_paused_after_resolution_is_skipped() {
        let f = fixture();
        f.store
            .update_enrollment(&f.due.enrollment.id, |e| {
                e.status = EnrollmentStatus::Paused;
                Ok(())
            })
            .unwrap();
        let transport = Arc::new(RecordingTransport::new());
        let d = dispatcher(&f.store, transport.clone(), 5);

        assert!(matches!(
            d.dispatch(&f.due, f.now).await.unwrap(),
            DispatchOutcome::Skipped(_)
        ));
        assert!(f.store.scheduled_email(&f.due.key()).is_none());
    }
}
