use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use drip_core::config::{DispatchConfig, TriggerConfig};
use drip_core::event_bus::{noop_sink, EventSink};
use drip_core::DripResult;
use tracing::info;
use uuid::Uuid;

use crate::analytics::AnalyticsRecorder;
use crate::dispatcher::Dispatcher;
use crate::enrollment::EnrollmentManager;
use crate::resolver::DueStepResolver;
use crate::seed::default_sequences;
use crate::sequences::SequenceCatalog;
use crate::store::AutomationStore;
use crate::transport::EmailTransport;
use crate::trigger::{FireOutcome, FireSchedule, Trigger};
use crate::types::{ContactEvent, SequenceEnrollment, SequenceStats};

/// Automation facade — wires the store, enrollment, resolution, dispatch and
/// analytics components over one shared store.
#[derive(Clone)]
pub struct AutomationEngine {
    store: Arc<AutomationStore>,
    catalog: SequenceCatalog,
    enrollments: EnrollmentManager,
    resolver: DueStepResolver,
    dispatcher: Dispatcher,
    analytics: AnalyticsRecorder,
    max_concurrent: usize,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for AutomationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationEngine")
            .field("subscribers", &self.store.subscriber_count())
            .field("enrollments", &self.store.enrollment_count())
            .field("transport", &self.dispatcher.transport_name())
            .finish()
    }
}

impl AutomationEngine {
    pub fn new(
        store: Arc<AutomationStore>,
        transport: Arc<dyn EmailTransport>,
        config: &DispatchConfig,
    ) -> Self {
        Self::with_event_sink(store, transport, config, noop_sink())
    }

    /// Builds every component with the same event sink attached.
    pub fn with_event_sink(
        store: Arc<AutomationStore>,
        transport: Arc<dyn EmailTransport>,
        config: &DispatchConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            catalog: SequenceCatalog::new(store.clone()),
            enrollments: EnrollmentManager::new(store.clone()).with_event_sink(sink.clone()),
            resolver: DueStepResolver::new(store.clone()).with_event_sink(sink.clone()),
            dispatcher: Dispatcher::new(store.clone(), transport, config).with_event_sink(sink.clone()),
            analytics: AnalyticsRecorder::new(store.clone()).with_event_sink(sink.clone()),
            max_concurrent: config.max_concurrent_sends,
            store,
            event_sink: sink,
        }
    }

    pub fn store(&self) -> &Arc<AutomationStore> {
        &self.store
    }

    pub fn catalog(&self) -> &SequenceCatalog {
        &self.catalog
    }

    pub fn enrollments(&self) -> &EnrollmentManager {
        &self.enrollments
    }

    pub fn analytics(&self) -> &AnalyticsRecorder {
        &self.analytics
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Registers the built-in sequences for any source that has no route yet.
    /// Returns the ids of the sequences registered.
    pub fn seed_default_sequences(&self) -> DripResult<Vec<Uuid>> {
        let mut registered = Vec::new();
        for sequence in default_sequences() {
            if self.catalog.sequence_for_source(sequence.source).is_some() {
                continue;
            }
            registered.push(self.catalog.register_sequence(sequence)?);
        }
        info!(count = registered.len(), "Seeded default sequences");
        Ok(registered)
    }

    pub fn handle_contact_event_at(
        &self,
        event: &ContactEvent,
        now: DateTime<Utc>,
    ) -> DripResult<Option<SequenceEnrollment>> {
        self.enrollments.handle_contact_event_at(event, now)
    }

    pub fn sequence_stats(&self, sequence_id: &Uuid) -> SequenceStats {
        self.analytics.sequence_stats(sequence_id)
    }

    /// A trigger driving this engine's resolver and dispatcher on the
    /// configured schedule.
    pub fn trigger(
        &self,
        config: &TriggerConfig,
        snapshot_path: Option<PathBuf>,
    ) -> DripResult<Arc<Trigger>> {
        let schedule = FireSchedule::from_config(config)?;
        Ok(Arc::new(
            Trigger::new(
                schedule,
                self.resolver.clone(),
                self.dispatcher.clone(),
                self.store.clone(),
                self.max_concurrent,
            )
            .with_event_sink(self.event_sink.clone())
            .with_snapshot_path(snapshot_path)
            .with_run_on_start(config.run_on_start),
        ))
    }

    /// One resolve-and-dispatch run for `now`, outside any schedule.
    pub async fn run_once(&self, now: DateTime<Utc>) -> FireOutcome {
        let trigger = Trigger::new(
            FireSchedule::Interval {
                every: chrono::Duration::hours(1),
            },
            self.resolver.clone(),
            self.dispatcher.clone(),
            self.store.clone(),
            self.max_concurrent,
        )
        .with_event_sink(self.event_sink.clone());
        trigger.fire(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RecordingTransport;
    use crate::types::SourceDetails;
    use drip_core::types::ContactSource;

    #[tokio::test]
    async fn test_seed_then_contact_then_run() {
        let transport = Arc::new(RecordingTransport::new());
        let engine = AutomationEngine::new(
            Arc::new(AutomationStore::new()),
            transport.clone(),
            &DispatchConfig::default(),
        );
        assert_eq!(engine.seed_default_sequences().unwrap().len(), 3);
        assert!(engine.seed_default_sequences().unwrap().is_empty());

        let now = Utc::now();
        let enrollment = engine
            .handle_contact_event_at(
                &ContactEvent {
                    email: "lin@corp.example".to_string(),
                    name: "Lin Chen".to_string(),
                    details: SourceDetails::Corporate {
                        company: "Acme".to_string(),
                        team_size: Some(40),
                        message: None,
                    },
                },
                now,
            )
            .unwrap()
            .unwrap();

        let FireOutcome::Completed(report) = engine.run_once(now).await else {
            panic!("Expected a completed run");
        };
        assert_eq!(report.sent, 1);
        let sent = transport.sent_to("lin@corp.example");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].html_body.contains("Acme"));

        let sequence = engine
            .catalog()
            .sequence_for_source(ContactSource::Corporate)
            .unwrap();
        assert_eq!(sequence.id, enrollment.sequence_id);
        assert_eq!(engine.sequence_stats(&sequence.id).sent, 1);
    }

    #[test]
    fn test_trigger_built_from_config() {
        let engine = AutomationEngine::new(
            Arc::new(AutomationStore::new()),
            Arc::new(RecordingTransport::new()),
            &DispatchConfig::default(),
        );
        let trigger = engine.trigger(&TriggerConfig::default(), None).unwrap();
        assert!(matches!(trigger.schedule(), FireSchedule::Daily { .. }));

        let bad = TriggerConfig {
            daily_at: "noon".to_string(),
            ..Default::default()
        };
        assert!(engine.trigger(&bad, None).is_err());
    }
}
