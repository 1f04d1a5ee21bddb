//! Sequenced email automation — enrolls contacts into timed drip sequences,
//! resolves which step is due on each run, dispatches it at most once, and
//! records delivery analytics.

pub mod analytics;
pub mod dispatcher;
pub mod engine;
pub mod enrollment;
pub mod resolver;
pub mod seed;
pub mod sequences;
pub mod state_machine;
pub mod store;
pub mod transport;
pub mod trigger;
pub mod types;

pub use analytics::AnalyticsRecorder;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::AutomationEngine;
pub use enrollment::EnrollmentManager;
pub use resolver::DueStepResolver;
pub use sequences::SequenceCatalog;
pub use store::AutomationStore;
pub use transport::{EmailTransport, OutboundEmail, TransportError, TransportReceipt};
pub use trigger::{FireOutcome, FireSchedule, RunReport, Trigger};
