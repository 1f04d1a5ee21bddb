use drip_core::{DripError, DripResult};
use serde::{Deserialize, Serialize};

use crate::types::EnrollmentStatus;

/// Describes a single valid status transition for an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: EnrollmentStatus,
    pub to: EnrollmentStatus,
    pub trigger: String,
}

/// Guards enrollment lifecycle by enforcing a finite set of valid status
/// transitions. Terminal statuses have no outgoing edges.
#[derive(Debug, Clone)]
pub struct EnrollmentStateMachine {
    pub transitions: Vec<StateTransition>,
}

impl EnrollmentStateMachine {
    pub fn new() -> Self {
        let edge = |from, to, trigger: &str| StateTransition {
            from,
            to,
            trigger: trigger.to_string(),
        };

        let transitions = vec![
            // Active ->
            edge(EnrollmentStatus::Active, EnrollmentStatus::Paused, "pause"),
            edge(EnrollmentStatus::Active, EnrollmentStatus::Completed, "sequence_complete"),
            edge(EnrollmentStatus::Active, EnrollmentStatus::Unsubscribed, "unsubscribe"),
            edge(EnrollmentStatus::Active, EnrollmentStatus::Abandoned, "retries_exhausted"),
            // Paused ->
            edge(EnrollmentStatus::Paused, EnrollmentStatus::Active, "resume"),
            edge(EnrollmentStatus::Paused, EnrollmentStatus::Unsubscribed, "unsubscribe_while_paused"),
        ];

        Self { transitions }
    }

    /// Returns `true` if the given transition is allowed.
    pub fn can_transition(&self, from: EnrollmentStatus, to: EnrollmentStatus) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// Returns an error naming both statuses if the transition is not permitted.
    pub fn check(&self, from: EnrollmentStatus, to: EnrollmentStatus) -> DripResult<()> {
        if self.can_transition(from, to) {
            Ok(())
        } else {
            Err(DripError::InvalidTransition(format!(
                "{:?} -> {:?}",
                from, to
            )))
        }
    }
}

impl Default for EnrollmentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
