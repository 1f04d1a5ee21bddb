//! End-to-end scenarios for the drip pipeline: contact event, enrollment,
//! scheduled runs, dispatch, completion.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use drip_automation::transport::RecordingTransport;
use drip_automation::types::{
    ContactEvent, EmailSequence, EnrollmentStatus, ScheduledStatus, SequenceEmail, SourceDetails,
};
use drip_automation::store::journal_path;
use drip_automation::{AutomationEngine, AutomationStore, FireOutcome, RunReport};
use drip_core::config::DispatchConfig;
use drip_core::event_bus::capture_sink;
use drip_core::types::{ContactSource, EventType};

fn waitlist_event(email: &str) -> ContactEvent {
    ContactEvent {
        email: email.to_string(),
        name: "Sam Rivera".to_string(),
        details: SourceDetails::Waitlist {
            product: "Orbit".to_string(),
            referral_code: Some("SAM42".to_string()),
            position: Some(7),
        },
    }
}

fn engine_with(transport: Arc<RecordingTransport>, max_attempts: u32) -> AutomationEngine {
    let config = DispatchConfig {
        max_attempts,
        ..Default::default()
    };
    let engine = AutomationEngine::new(Arc::new(AutomationStore::new()), transport, &config);
    engine
        .catalog()
        .register_sequence(EmailSequence::new(
            "Waitlist",
            ContactSource::Waitlist,
            vec![
                SequenceEmail::new(0, Duration::zero(), "Welcome to {{product}}", "<p>#{{position}}</p>"),
                SequenceEmail::new(1, Duration::hours(24), "Day one", "<p>Hi {{first_name}}</p>"),
            ],
        ))
        .unwrap();
    engine
}

async fn run(engine: &AutomationEngine, now: chrono::DateTime<Utc>) -> RunReport {
    match engine.run_once(now).await {
        FireOutcome::Completed(report) => report,
        FireOutcome::Skipped => panic!("run unexpectedly skipped"),
    }
}

#[tokio::test]
async fn test_two_step_sequence_timeline() {
    let transport = Arc::new(RecordingTransport::new());
    let engine = engine_with(transport.clone(), 5);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();

    let enrollment = engine
        .handle_contact_event_at(&waitlist_event("sam@example.com"), t0)
        .unwrap()
        .unwrap();

    let report = run(&engine, t0).await;
    assert_eq!(report.sent, 1);
    assert_eq!(transport.sent()[0].subject, "Welcome to Orbit");

    let report = run(&engine, t0 + Duration::hours(1)).await;
    assert_eq!(report.due, 0);

    let report = run(&engine, t0 + Duration::hours(25)).await;
    assert_eq!(report.sent, 1);
    assert_eq!(transport.sent()[1].html_body, "<p>Hi Sam</p>");

    let finished = engine.enrollments().get_enrollment(&enrollment.id).unwrap();
    assert_eq!(finished.status, EnrollmentStatus::Completed);
    assert_eq!(finished.current_step, 2);

    let report = run(&engine, t0 + Duration::days(60)).await;
    assert_eq!(report.due, 0);
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn test_late_trigger_sends_one_step_per_run() {
    let transport = Arc::new(RecordingTransport::new());
    let engine = engine_with(transport.clone(), 5);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();
    engine
        .handle_contact_event_at(&waitlist_event("late@example.com"), t0)
        .unwrap();

    // The trigger was down for a week: step 0 goes out, step 1 waits a
    // full delay after it.
    let late = t0 + Duration::days(7);
    assert_eq!(run(&engine, late).await.sent, 1);
    assert_eq!(run(&engine, late + Duration::hours(1)).await.due, 0);
    assert_eq!(run(&engine, late + Duration::hours(24)).await.sent, 1);
}

#[tokio::test]
async fn test_failed_first_attempt_is_retried() {
    let transport = Arc::new(RecordingTransport::failing_first(1));
    let engine = engine_with(transport.clone(), 5);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();
    let enrollment = engine
        .handle_contact_event_at(&waitlist_event("retry@example.com"), t0)
        .unwrap()
        .unwrap();

    let report = run(&engine, t0).await;
    assert_eq!(report.failed, 1);
    let records = engine.store().scheduled_for_enrollment(&enrollment.id);
    assert_eq!(records[0].status, ScheduledStatus::Failed);
    assert_eq!(records[0].attempts, 1);
    assert_eq!(
        engine.enrollments().get_enrollment(&enrollment.id).unwrap().current_step,
        0
    );

    let report = run(&engine, t0 + Duration::hours(1)).await;
    assert_eq!(report.sent, 1);
    let records = engine.store().scheduled_for_enrollment(&enrollment.id);
    assert_eq!(records[0].status, ScheduledStatus::Sent);
    assert_eq!(records[0].attempts, 2);
}

#[tokio::test]
async fn test_retry_cap_abandons_enrollment() {
    let transport = Arc::new(RecordingTransport::new());
    transport.fail_address("bounce@example.com");
    let engine = engine_with(transport.clone(), 3);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();
    let enrollment = engine
        .handle_contact_event_at(&waitlist_event("bounce@example.com"), t0)
        .unwrap()
        .unwrap();

    for day in 0..3 {
        run(&engine, t0 + Duration::days(day)).await;
    }
    assert_eq!(
        engine.enrollments().get_enrollment(&enrollment.id).unwrap().status,
        EnrollmentStatus::Abandoned
    );
    assert_eq!(run(&engine, t0 + Duration::days(4)).await.due, 0);
    assert_eq!(transport.attempt_count(), 3);
}

#[tokio::test]
async fn test_concurrent_runs_deliver_each_step_once() {
    let transport = Arc::new(
        RecordingTransport::new().with_latency(std::time::Duration::from_millis(10)),
    );
    let engine = engine_with(transport.clone(), 5);
    let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();
    for i in 0..20 {
        engine
            .handle_contact_event_at(&waitlist_event(&format!("user{}@example.com", i)), t0)
            .unwrap();
    }

    // Independent runs racing on the same store.
    let (a, b, c) = tokio::join!(run(&engine, t0), run(&engine, t0), run(&engine, t0));
    assert_eq!(a.sent + b.sent + c.sent, 20);
    assert_eq!(transport.sent().len(), 20);

    run(&engine, t0 + Duration::hours(2)).await;
    assert_eq!(transport.sent().len(), 20);
}

#[tokio::test]
async fn test_unsubscribe_stops_sequence_and_blocks_reenrollment() {
    let transport = Arc::new(RecordingTransport::new());
    let sink = capture_sink();
    let store = Arc::new(AutomationStore::new());
    let engine = AutomationEngine::with_event_sink(
        store,
        transport.clone(),
        &DispatchConfig::default(),
        sink.clone(),
    );
    engine.seed_default_sequences().unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();

    let enrollment = engine
        .handle_contact_event_at(&waitlist_event("gone@example.com"), t0)
        .unwrap()
        .unwrap();
    run(&engine, t0).await;
    assert_eq!(
        engine.enrollments().unsubscribe_email("gone@example.com").unwrap(),
        1
    );

    assert_eq!(run(&engine, t0 + Duration::days(30)).await.due, 0);
    assert_eq!(transport.sent().len(), 1);
    assert_eq!(
        engine.enrollments().get_enrollment(&enrollment.id).unwrap().status,
        EnrollmentStatus::Unsubscribed
    );

    let again = engine
        .handle_contact_event_at(&waitlist_event("gone@example.com"), t0 + Duration::days(31))
        .unwrap();
    assert!(again.is_none());
    assert_eq!(sink.count_type(EventType::EnrollmentUnsubscribed), 1);
    assert_eq!(sink.count_type(EventType::EnrollmentCreated), 1);
}

#[tokio::test]
async fn test_restart_after_crash_mid_run_does_not_resend() {
    let dir = std::env::temp_dir().join(format!("drip-restart-{}", uuid::Uuid::new_v4()));
    let snapshot = dir.join("state.json");
    let transport = Arc::new(RecordingTransport::new());
    let t0 = Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap();

    {
        let engine = engine_with(transport.clone(), 5);
        engine
            .handle_contact_event_at(&waitlist_event("sam@example.com"), t0)
            .unwrap()
            .unwrap();
        engine.store().save_to(&snapshot).unwrap();
        engine
            .store()
            .attach_journal(&journal_path(&snapshot))
            .unwrap();

        // The run delivers step 0, then the process dies before the
        // end-of-run snapshot.
        assert_eq!(run(&engine, t0).await.sent, 1);
    }

    let store = Arc::new(AutomationStore::load_from(&snapshot).unwrap().unwrap());
    store.attach_journal(&journal_path(&snapshot)).unwrap();
    let engine = AutomationEngine::new(store, transport.clone(), &DispatchConfig::default());

    let report = run(&engine, t0 + Duration::hours(1)).await;
    assert_eq!(report.due, 0);
    assert_eq!(transport.sent_to("sam@example.com").len(), 1);

    // The sequence carries on from the recovered position.
    let report = run(&engine, t0 + Duration::hours(25)).await;
    assert_eq!(report.sent, 1);
    assert_eq!(transport.sent_to("sam@example.com").len(), 2);

    std::fs::remove_dir_all(&dir).ok();
}
