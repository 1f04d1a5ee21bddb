//! Unified event bus — trait for emitting analytics events from any module.
//!
//! Modules accept an `Arc<dyn EventSink>` to forward lifecycle and delivery
//! events to downstream consumers (warehouse loaders, webhooks, logs).

use crate::types::{AnalyticsEvent, EventType};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Trait for emitting analytics events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AnalyticsEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: AnalyticsEvent) {}
}

/// Sink that writes every event as a structured `tracing` line.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: AnalyticsEvent) {
        tracing::info!(
            node_id = %event.node_id,
            event_type = ?event.event_type,
            enrollment_id = ?event.enrollment_id,
            step_index = ?event.step_index,
            detail = ?event.detail,
            "analytics event"
        );
    }
}

/// Stamps every event with this node's id before forwarding it.
pub struct NodeSink {
    node_id: String,
    inner: Arc<dyn EventSink>,
}

impl NodeSink {
    pub fn new(node_id: impl Into<String>, inner: Arc<dyn EventSink>) -> Self {
        Self {
            node_id: node_id.into(),
            inner,
        }
    }
}

impl EventSink for NodeSink {
    fn emit(&self, mut event: AnalyticsEvent) {
        event.node_id = self.node_id.clone();
        self.inner.emit(event);
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: AnalyticsEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for creating `AnalyticsEvent` with minimal boilerplate.
pub fn make_event(
    event_type: EventType,
    enrollment_id: Option<Uuid>,
    subscriber_id: Option<Uuid>,
    step_index: Option<u32>,
) -> AnalyticsEvent {
    AnalyticsEvent {
        event_id: Uuid::new_v4(),
        event_type,
        enrollment_id,
        subscriber_id,
        scheduled_email_id: None,
        step_index,
        detail: None,
        node_id: "local".into(),
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
