//! Sequence definition store — registration, trailing-step appends, and
//! source routing for drip sequences.

use std::sync::Arc;

use chrono::Utc;
use drip_core::types::ContactSource;
use drip_core::{DripError, DripResult};
use tracing::info;
use uuid::Uuid;

use crate::store::AutomationStore;
use crate::types::{EmailSequence, SequenceEmail, MAX_STEP_DELAY_SECS};

#[derive(Clone)]
pub struct SequenceCatalog {
    store: Arc<AutomationStore>,
}

impl SequenceCatalog {
    pub fn new(store: Arc<AutomationStore>) -> Self {
        Self { store }
    }

    /// Validates and stores a sequence. An active sequence also becomes the
    /// route for its contact source; a source can route to one sequence only.
    pub fn register_sequence(&self, sequence: EmailSequence) -> DripResult<Uuid> {
        sequence.validate()?;
        if self.store.get_sequence(&sequence.id).is_some() {
            return Err(DripError::InvalidSequence(format!(
                "sequence {} already registered",
                sequence.id
            )));
        }

        let id = sequence.id;
        if sequence.active {
            self.store.claim_route(sequence.source, id)?;
        }

        info!(
            sequence_id = %id,
            name = %sequence.name,
            source = sequence.source.tag(),
            steps = sequence.steps.len(),
            "Registered sequence"
        );
        self.store.insert_sequence(sequence);
        Ok(id)
    }

    /// Appends a trailing step. Existing steps are immutable once enrollments
    /// may reference them, so only `delay`, subject and body are supplied and
    /// the index is assigned here.
    pub fn append_step(
        &self,
        sequence_id: &Uuid,
        delay: chrono::Duration,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> DripResult<SequenceEmail> {
        if delay.num_seconds() > MAX_STEP_DELAY_SECS as i64 {
            return Err(DripError::InvalidSequence(format!(
                "step delay of {}s exceeds {}s",
                delay.num_seconds(),
                MAX_STEP_DELAY_SECS
            )));
        }
        let subject = subject.into();
        let html_body = html_body.into();
        self.store.update_sequence(sequence_id, |sequence| {
            let step = SequenceEmail::new(sequence.len(), delay, subject, html_body);
            sequence.steps.push(step.clone());
            sequence.version += 1;
            sequence.updated_at = Utc::now();
            info!(
                sequence_id = %sequence.id,
                step_index = step.step_index,
                "Appended sequence step"
            );
            Ok(step)
        })
    }

    pub fn get_sequence(&self, id: &Uuid) -> Option<EmailSequence> {
        self.store.get_sequence(id)
    }

    pub fn list_sequences(&self) -> Vec<EmailSequence> {
        self.store.list_sequences()
    }

    /// The active sequence new contacts from `source` are enrolled into.
    pub fn sequence_for_source(&self, source: ContactSource) -> Option<EmailSequence> {
        let id = self.store.routed_sequence(source)?;
        self.store.get_sequence(&id).filter(|s| s.active)
    }

    /// Activating claims the source route; deactivating releases it and stops
    /// new enrollments. Existing enrollments keep progressing either way.
    pub fn set_sequence_active(&self, id: &Uuid, active: bool) -> DripResult<()> {
        let sequence = self
            .store
            .get_sequence(id)
            .ok_or_else(|| DripError::NotFound(format!("sequence {}", id)))?;

        if active {
            self.store.claim_route(sequence.source, *id)?;
        } else {
            self.store.release_route(sequence.source, *id);
        }

        self.store.update_sequence(id, |sequence| {
            sequence.active = active;
            sequence.updated_at = Utc::now();
            Ok(())
        })?;
        info!(sequence_id = %id, active, "Updated sequence status");
        Ok(())
    }
}
