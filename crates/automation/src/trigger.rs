//! Periodic trigger — fires a resolve-and-dispatch run on a daily or fixed
//! interval schedule.
//!
//! At most one run is in progress at a time. A tick that arrives while a
//! run is still going is dropped and counted, not queued.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use drip_core::config::{TriggerConfig, TriggerMode};
use drip_core::event_bus::{make_event, noop_sink, EventSink};
use drip_core::types::EventType;
use drip_core::{DripError, DripResult};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::resolver::DueStepResolver;
use crate::store::AutomationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireSchedule {
    /// Once a day at a fixed UTC wall-clock time.
    Daily { at: NaiveTime },
    Interval { every: Duration },
}

impl FireSchedule {
    pub fn from_config(config: &TriggerConfig) -> DripResult<Self> {
        match config.mode {
            TriggerMode::Daily => {
                let at = NaiveTime::parse_from_str(config.daily_at.trim(), "%H:%M").map_err(|e| {
                    DripError::Config(format!("invalid daily_at '{}': {}", config.daily_at, e))
                })?;
                Ok(FireSchedule::Daily { at })
            }
            TriggerMode::Interval => {
                if config.interval_secs == 0 {
                    return Err(DripError::Config("interval_secs must be positive".to_string()));
                }
                Ok(FireSchedule::Interval {
                    every: Duration::seconds(config.interval_secs as i64),
                })
            }
        }
    }

    /// The first fire instant strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            FireSchedule::Daily { at } => {
                let today = now.date_naive().and_time(at).and_utc();
                if today > now {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
            FireSchedule::Interval { every } => now + every,
        }
    }
}

/// Tally of one resolve-and-dispatch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub already_sent: usize,
    pub in_flight: usize,
    pub skipped: usize,
    pub errors: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FireOutcome {
    Completed(RunReport),
    /// Another run was still in progress.
    Skipped,
}

/// Clears the running flag when a run ends, including by panic.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct Trigger {
    schedule: FireSchedule,
    resolver: DueStepResolver,
    dispatcher: Dispatcher,
    store: Arc<AutomationStore>,
    max_concurrent: usize,
    run_on_start: bool,
    snapshot_path: Option<PathBuf>,
    running: AtomicBool,
    runs: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Notify,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trigger")
            .field("schedule", &self.schedule)
            .field("max_concurrent", &self.max_concurrent)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Trigger {
    pub fn new(
        schedule: FireSchedule,
        resolver: DueStepResolver,
        dispatcher: Dispatcher,
        store: Arc<AutomationStore>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            schedule,
            resolver,
            dispatcher,
            store,
            max_concurrent: max_concurrent.max(1),
            run_on_start: false,
            snapshot_path: None,
            running: AtomicBool::new(false),
            runs: Mutex::new(Vec::new()),
            shutdown: Notify::new(),
            event_sink: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Persist the store to `path` after every completed run.
    pub fn with_snapshot_path(mut self, path: Option<PathBuf>) -> Self {
        self.snapshot_path = path;
        self
    }

    pub fn with_run_on_start(mut self, run_on_start: bool) -> Self {
        self.run_on_start = run_on_start;
        self
    }

    pub fn schedule(&self) -> FireSchedule {
        self.schedule
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run once for `now`, unless a run is already in progress.
    pub async fn fire(&self, now: DateTime<Utc>) -> FireOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(tick = %now, "Previous run still in progress, skipping tick");
            metrics::counter!("drip.runs_skipped").increment(1);
            self.event_sink
                .emit(make_event(EventType::RunSkipped, None, None, None));
            return FireOutcome::Skipped;
        }
        let _guard = RunGuard(&self.running);

        let report = self.run_batch(now).await;
        info!(
            due = report.due,
            sent = report.sent,
            failed = report.failed,
            abandoned = report.abandoned,
            already_sent = report.already_sent,
            in_flight = report.in_flight,
            errors = report.errors,
            "Drip run completed"
        );
        let mut event = make_event(EventType::RunCompleted, None, None, None);
        event.detail = serde_json::to_string(&report).ok();
        self.event_sink.emit(event);

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = self.store.save_to(path) {
                error!(path = %path.display(), error = %e, "Failed to save store snapshot");
            }
        }

        FireOutcome::Completed(report)
    }

    async fn run_batch(&self, now: DateTime<Utc>) -> RunReport {
        let started_at = Utc::now();
        let due = self.resolver.find_due(now);
        let mut report = RunReport {
            due: due.len(),
            started_at,
            ..Default::default()
        };
        debug!(due = due.len(), "Resolved due steps");

        // One failing pair never stops the rest of the batch.
        let outcomes: Vec<_> = stream::iter(due)
            .map(|step| {
                let dispatcher = self.dispatcher.clone();
                async move {
                    let outcome = dispatcher.dispatch(&step, now).await;
                    (step, outcome)
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for (step, outcome) in outcomes {
            match outcome {
                Ok(DispatchOutcome::Sent { .. }) => report.sent += 1,
                Ok(DispatchOutcome::Failed { abandoned, .. }) => {
                    report.failed += 1;
                    if abandoned {
                        report.abandoned += 1;
                    }
                }
                Ok(DispatchOutcome::AlreadySent) => report.already_sent += 1,
                Ok(DispatchOutcome::InFlight) => report.in_flight += 1,
                Ok(DispatchOutcome::Skipped(reason)) => {
                    debug!(enrollment_id = %step.enrollment.id, reason = %reason, "Step skipped");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        enrollment_id = %step.enrollment.id,
                        step_index = step.step.step_index,
                        error = %e,
                        "Dispatch error"
                    );
                    report.errors += 1;
                }
            }
        }

        report.finished_at = Utc::now();
        let elapsed = report.finished_at - report.started_at;
        metrics::histogram!("drip.run_duration_ms").record(elapsed.num_milliseconds() as f64);
        report
    }

    /// Spawn the schedule loop. Each tick spawns its run so a slow run
    /// cannot delay the next tick; overlapping ticks are dropped by `fire`.
    /// The returned handle resolves once the loop has stopped and every run
    /// it spawned has finished.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let trigger = Arc::clone(self);
        tokio::spawn(async move {
            info!(schedule = ?trigger.schedule, "Drip trigger started");
            if trigger.run_on_start {
                trigger.spawn_fire();
            }

            loop {
                let now = Utc::now();
                let next = trigger.schedule.next_fire_after(now);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(next_fire = %next, "Waiting for next tick");

                tokio::select! {
                    _ = tokio::time::sleep(wait) => trigger.spawn_fire(),
                    _ = trigger.shutdown.notified() => break,
                }
            }

            let runs = std::mem::take(&mut *trigger.runs.lock());
            if !runs.is_empty() {
                info!(runs = runs.len(), "Waiting for in-progress runs");
            }
            for run in runs {
                if let Err(e) = run.await {
                    error!(error = %e, "Drip run task failed");
                }
            }
            info!("Drip trigger stopped");
        })
    }

    fn spawn_fire(self: &Arc<Self>) {
        let trigger = Arc::clone(self);
        let handle = tokio::spawn(async move {
            trigger.fire(Utc::now()).await;
        });
        let mut runs = self.runs.lock();
        runs.retain(|run| !run.is_finished());
        runs.push(handle);
    }

    /// Stop the schedule loop. A run already in progress finishes before the
    /// handle returned by `start` resolves.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use crate::types::{ContactEvent, EmailSequence, SequenceEmail, SequenceEnrollment, SourceDetails};
    use chrono::TimeZone;
    use drip_core::config::DispatchConfig;
    use drip_core::event_bus::capture_sink;
    use drip_core::types::ContactSource;

    fn trigger_with(transport: Arc<RecordingTransport>, subscribers: usize) -> Trigger {
        let store = Arc::new(AutomationStore::new());
        let now = Utc::now();
        let sequence = EmailSequence::new(
            "Waitlist",
            ContactSource::Waitlist,
            vec![SequenceEmail::new(0, Duration::zero(), "You're in", "<p>Welcome</p>")],
        );
        let sequence_id = sequence.id;
        store.insert_sequence(sequence);
        for i in 0..subscribers {
            let (subscriber, _) = store
                .upsert_subscriber(
                    &ContactEvent {
                        email: format!("user{}@example.com", i),
                        name: "User".to_string(),
                        details: SourceDetails::Waitlist {
                            product: "Beta".to_string(),
                            referral_code: None,
                            position: Some(i as u32),
                        },
                    },
                    now,
                )
                .unwrap();
            store
                .insert_enrollment_if_absent(SequenceEnrollment::new(subscriber.id, sequence_id, now))
                .unwrap();
        }

        let dispatcher = Dispatcher::new(store.clone(), transport, &DispatchConfig::default());
        Trigger::new(
            FireSchedule::Interval {
                every: Duration::hours(1),
            },
            DueStepResolver::new(store.clone()),
            dispatcher,
            store,
            4,
        )
    }

    #[test]
    fn test_daily_schedule_next_fire() {
        let schedule = FireSchedule::Daily {
            at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };
        let before = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(
            schedule.next_fire_after(before),
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
        );
        let exactly = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(
            schedule.next_fire_after(exactly),
            Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_schedule_from_config() {
        let daily = FireSchedule::from_config(&TriggerConfig::default()).unwrap();
        assert_eq!(
            daily,
            FireSchedule::Daily {
                at: NaiveTime::from_hms_opt(9, 0, 0).unwrap()
            }
        );

        let interval = FireSchedule::from_config(&TriggerConfig {
            mode: TriggerMode::Interval,
            interval_secs: 300,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            interval.next_fire_after(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap()
        );

        assert!(FireSchedule::from_config(&TriggerConfig {
            daily_at: "25:00".to_string(),
            ..Default::default()
        })
        .is_err());
        assert!(FireSchedule::from_config(&TriggerConfig {
            mode: TriggerMode::Interval,
            interval_secs: 0,
            ..Default::default()
        })
        .is_err());
    }

    #[tokio::test]
    async fn test_fire_dispatches_batch_and_reports() {
        let transport = Arc::new(RecordingTransport::new());
        transport.fail_address("user3@example.com");
        let trigger = trigger_with(transport.clone(), 10);

        let FireOutcome::Completed(report) = trigger.fire(Utc::now()).await else {
            panic!("Expected a completed run");
        };
        assert_eq!(report.due, 10);
        assert_eq!(report.sent, 9);
        assert_eq!(report.failed, 1);
        assert_eq!(transport.sent().len(), 9);
        assert!(!trigger.is_running());

        // Rerun: only the failed step is due again.
        transport.heal_address("user3@example.com");
        let FireOutcome::Completed(report) = trigger.fire(Utc::now()).await else {
            panic!("Expected a completed run");
        };
        assert_eq!(report.due, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(transport.sent().len(), 10);
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let transport = Arc::new(
            RecordingTransport::new().with_latency(std::time::Duration::from_millis(50)),
        );
        let sink = capture_sink();
        let trigger = trigger_with(transport.clone(), 3).with_event_sink(sink.clone());

        let now = Utc::now();
        let (first, second) = tokio::join!(trigger.fire(now), trigger.fire(now));
        assert!(matches!(first, FireOutcome::Completed(_)));
        assert!(matches!(second, FireOutcome::Skipped));
        assert_eq!(sink.count_type(EventType::RunSkipped), 1);
        assert_eq!(sink.count_type(EventType::RunCompleted), 1);
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn test_storage_error_does_not_stop_batch() {
        let transport = Arc::new(RecordingTransport::new());
        let trigger = trigger_with(transport.clone(), 4);

        // An enrollment whose subscriber record does not exist.
        let sequence_id = trigger.store.list_sequences()[0].id;
        trigger
            .store
            .insert_enrollment_if_absent(SequenceEnrollment::new(
                uuid::Uuid::new_v4(),
                sequence_id,
                Utc::now(),
            ))
            .unwrap();

        let FireOutcome::Completed(report) = trigger.fire(Utc::now()).await else {
            panic!("Expected a completed run");
        };
        assert_eq!(report.due, 5);
        assert_eq!(report.errors, 1);
        assert_eq!(report.sent, 4);
        assert_eq!(transport.sent().len(), 4);
    }

    #[tokio::test]
    async fn test_stop_waits_for_run_in_progress() {
        let transport = Arc::new(
            RecordingTransport::new().with_latency(std::time::Duration::from_millis(200)),
        );
        let trigger = Arc::new(trigger_with(transport.clone(), 2).with_run_on_start(true));
        let handle = trigger.start();

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(trigger.is_running());
        trigger.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("trigger loop should stop")
            .unwrap();

        assert!(!trigger.is_running());
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let transport = Arc::new(RecordingTransport::new());
        let trigger = Arc::new(trigger_with(transport, 1));
        let handle = trigger.start();
        trigger.stop();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("trigger loop should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_written_after_run() {
        let dir = std::env::temp_dir().join(format!("drip-trigger-{}", uuid::Uuid::new_v4()));
        let path = dir.join("state.json");
        let transport = Arc::new(RecordingTransport::new());
        let trigger = trigger_with(transport, 2).with_snapshot_path(Some(path.clone()));

        trigger.fire(Utc::now()).await;
        let restored = AutomationStore::load_from(&path).unwrap().unwrap();
        assert_eq!(restored.enrollment_count(), 2);
        std::fs::remove_dir_all(&dir).ok();
    }
}
