//! Concurrent in-memory store for the five automation entities, with JSON
//! snapshot persistence.
//!
//! Uniqueness constraints are enforced by map keys: subscriber email,
//! (subscriber, sequence) enrollment pair, and (enrollment, step) dispatch
//! key. Operations that touch two maps always lock the scheduled-email entry
//! before the enrollment entry, and never hold a guard while iterating.
//!
//! Between snapshots every claim, commit and failure is appended to a JSON
//! lines journal next to the snapshot file, so a crash mid-run loses no
//! delivered step. `load_from` replays the journal over the snapshot and
//! `save_to` truncates it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use drip_core::types::ContactSource;
use drip_core::{DripError, DripResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::state_machine::EnrollmentStateMachine;

use crate::types::{
    ContactEvent, DispatchKey, EmailAnalytics, EmailSequence, EmailSubscriber, EnrollmentStatus,
    ScheduledEmail, ScheduledStatus, SequenceEnrollment,
};

/// Result of trying to claim a (enrollment, step) for dispatch.
#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    /// The caller owns this attempt and must send, then commit or fail it.
    Claimed(ScheduledEmail),
    /// A sent record already exists.
    AlreadySent(ScheduledEmail),
    /// Another worker holds a fresh claim.
    InFlight(ScheduledEmail),
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub scheduled: ScheduledEmail,
    pub abandoned: bool,
}

#[derive(Debug, Default)]
pub struct AutomationStore {
    subscribers: DashMap<Uuid, EmailSubscriber>,
    subscriber_emails: DashMap<String, Uuid>,
    sequences: DashMap<Uuid, EmailSequence>,
    source_routes: DashMap<ContactSource, Uuid>,
    enrollments: DashMap<Uuid, SequenceEnrollment>,
    enrollment_pairs: DashMap<(Uuid, Uuid), Uuid>,
    scheduled: DashMap<DispatchKey, ScheduledEmail>,
    scheduled_ids: DashMap<Uuid, DispatchKey>,
    analytics: RwLock<Vec<EmailAnalytics>>,
    state_machine: EnrollmentStateMachine,
    /// Also serializes `save_to`.
    journal: Mutex<Option<Journal>>,
}

#[derive(Debug)]
struct Journal {
    path: PathBuf,
    file: File,
}

/// One dispatch-state change as written to the journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub scheduled: ScheduledEmail,
    #[serde(default)]
    pub enrollment: Option<SequenceEnrollment>,
}

/// The journal file paired with a snapshot file.
pub fn journal_path(snapshot_path: &Path) -> PathBuf {
    snapshot_path.with_extension("journal")
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl AutomationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allowed enrollment status transitions, shared by every writer.
    pub fn state_machine(&self) -> &EnrollmentStateMachine {
        &self.state_machine
    }

    // ─── Subscribers ────────────────────────────────────────────────────────

    /// Returns the subscriber for the event's email, creating it on first
    /// contact. The bool is `true` when a new record was created.
    pub fn upsert_subscriber(
        &self,
        event: &ContactEvent,
        now: DateTime<Utc>,
    ) -> DripResult<(EmailSubscriber, bool)> {
        let email = normalize_email(&event.email);
        if email.is_empty() || !email.contains('@') {
            return Err(DripError::Storage(format!(
                "invalid subscriber email '{}'",
                event.email
            )));
        }

        match self.subscriber_emails.entry(email.clone()) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                drop(existing);
                self.get_subscriber(&id)
                    .map(|s| (s, false))
                    .ok_or_else(|| DripError::Storage(format!("email index points at missing subscriber {}", id)))
            }
            Entry::Vacant(slot) => {
                let subscriber = EmailSubscriber {
                    id: Uuid::new_v4(),
                    email,
                    name: event.name.trim().to_string(),
                    source: event.source(),
                    details: event.details.clone(),
                    active: true,
                    created_at: now,
                    deactivated_at: None,
                };
                self.subscribers.insert(subscriber.id, subscriber.clone());
                slot.insert(subscriber.id);
                Ok((subscriber, true))
            }
        }
    }

    pub fn get_subscriber(&self, id: &Uuid) -> Option<EmailSubscriber> {
        self.subscribers.get(id).map(|r| r.clone())
    }

    pub fn find_subscriber_by_email(&self, email: &str) -> Option<EmailSubscriber> {
        let id = self
            .subscriber_emails
            .get(&normalize_email(email))
            .map(|r| *r)?;
        self.get_subscriber(&id)
    }

    /// Soft-delete. Returns `false` when already inactive.
    pub fn deactivate_subscriber(&self, id: &Uuid, now: DateTime<Utc>) -> DripResult<bool> {
        let mut subscriber = self
            .subscribers
            .get_mut(id)
            .ok_or_else(|| DripError::NotFound(format!("subscriber {}", id)))?;
        if !subscriber.active {
            return Ok(false);
        }
        subscriber.active = false;
        subscriber.deactivated_at = Some(now);
        Ok(true)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // ─── Sequences ──────────────────────────────────────────────────────────

    pub fn insert_sequence(&self, sequence: EmailSequence) {
        self.sequences.insert(sequence.id, sequence);
    }

    pub fn get_sequence(&self, id: &Uuid) -> Option<EmailSequence> {
        self.sequences.get(id).map(|r| r.clone())
    }

    pub fn list_sequences(&self) -> Vec<EmailSequence> {
        self.sequences.iter().map(|r| r.value().clone()).collect()
    }

    /// Apply `f` to the stored sequence under its entry lock.
    pub fn update_sequence<T>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut EmailSequence) -> DripResult<T>,
    ) -> DripResult<T> {
        let mut sequence = self
            .sequences
            .get_mut(id)
            .ok_or_else(|| DripError::NotFound(format!("sequence {}", id)))?;
        f(&mut sequence)
    }

    /// Route `source` to `sequence_id`. Fails if another sequence holds the route.
    pub fn claim_route(&self, source: ContactSource, sequence_id: Uuid) -> DripResult<()> {
        match self.source_routes.entry(source) {
            Entry::Occupied(existing) if *existing.get() != sequence_id => {
                Err(DripError::InvalidSequence(format!(
                    "{} already routes to sequence {}",
                    source.display_name(),
                    existing.get()
                )))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(sequence_id);
                Ok(())
            }
        }
    }

    pub fn release_route(&self, source: ContactSource, sequence_id: Uuid) {
        self.source_routes
            .remove_if(&source, |_, routed| *routed == sequence_id);
    }

    pub fn routed_sequence(&self, source: ContactSource) -> Option<Uuid> {
        self.source_routes.get(&source).map(|r| *r)
    }

    // ─── Enrollments ────────────────────────────────────────────────────────

    /// Insert a new enrollment unless one exists for the pair. The bool is
    /// `true` when the enrollment was created.
    pub fn insert_enrollment_if_absent(
        &self,
        enrollment: SequenceEnrollment,
    ) -> DripResult<(SequenceEnrollment, bool)> {
        let pair = (enrollment.subscriber_id, enrollment.sequence_id);
        match self.enrollment_pairs.entry(pair) {
            Entry::Occupied(existing) => {
                let id = *existing.get();
                self.get_enrollment(&id)
                    .map(|e| (e, false))
                    .ok_or_else(|| DripError::Storage(format!("pair index points at missing enrollment {}", id)))
            }
            Entry::Vacant(slot) => {
                self.enrollments.insert(enrollment.id, enrollment.clone());
                slot.insert(enrollment.id);
                Ok((enrollment, true))
            }
        }
    }

    pub fn get_enrollment(&self, id: &Uuid) -> Option<SequenceEnrollment> {
        self.enrollments.get(id).map(|r| r.clone())
    }

    pub fn find_enrollment(&self, subscriber_id: &Uuid, sequence_id: &Uuid) -> Option<SequenceEnrollment> {
        let id = self
            .enrollment_pairs
            .get(&(*subscriber_id, *sequence_id))
            .map(|r| *r)?;
        self.get_enrollment(&id)
    }

    pub fn enrollments_for_subscriber(&self, subscriber_id: &Uuid) -> Vec<SequenceEnrollment> {
        self.enrollments
            .iter()
            .filter(|r| r.subscriber_id == *subscriber_id)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn enrollments_for_sequence(&self, sequence_id: &Uuid) -> Vec<SequenceEnrollment> {
        self.enrollments
            .iter()
            .filter(|r| r.sequence_id == *sequence_id)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Snapshot of every enrollment with `status`. The iteration guards are
    /// released before this returns.
    pub fn enrollments_with_status(&self, status: EnrollmentStatus) -> Vec<SequenceEnrollment> {
        self.enrollments
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn enrollment_count(&self) -> usize {
        self.enrollments.len()
    }

    /// Apply `f` to the stored enrollment under its entry lock.
    pub fn update_enrollment<T>(
        &self,
        id: &Uuid,
        f: impl FnOnce(&mut SequenceEnrollment) -> DripResult<T>,
    ) -> DripResult<T> {
        let mut enrollment = self
            .enrollments
            .get_mut(id)
            .ok_or_else(|| DripError::NotFound(format!("enrollment {}", id)))?;
        f(&mut enrollment)
    }

    // ─── Scheduled emails ───────────────────────────────────────────────────

    /// Atomic check-and-claim on the dedup key.
    pub fn claim_dispatch(
        &self,
        key: DispatchKey,
        recipient: &str,
        subject: &str,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> ClaimOutcome {
        let outcome = match self.scheduled.entry(key) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                match record.status {
                    ScheduledStatus::Sent => ClaimOutcome::AlreadySent(record.clone()),
                    ScheduledStatus::Pending
                        if record.claimed_at.is_some_and(|at| at + lease > now) =>
                    {
                        ClaimOutcome::InFlight(record.clone())
                    }
                    ScheduledStatus::Pending | ScheduledStatus::Failed => {
                        if record.status == ScheduledStatus::Pending {
                            warn!(
                                scheduled_email_id = %record.id,
                                "Reclaiming stale pending dispatch"
                            );
                        }
                        record.status = ScheduledStatus::Pending;
                        record.attempts += 1;
                        record.claimed_at = Some(now);
                        record.last_attempt_at = now;
                        record.recipient = recipient.to_string();
                        record.subject = subject.to_string();
                        ClaimOutcome::Claimed(record.clone())
                    }
                }
            }
            Entry::Vacant(slot) => {
                let record = ScheduledEmail {
                    id: Uuid::new_v4(),
                    enrollment_id: key.enrollment_id,
                    step_index: key.step_index,
                    recipient: recipient.to_string(),
                    subject: subject.to_string(),
                    status: ScheduledStatus::Pending,
                    attempts: 1,
                    scheduled_for,
                    claimed_at: Some(now),
                    last_attempt_at: now,
                    sent_at: None,
                    last_error: None,
                    provider_message_id: None,
                };
                self.scheduled_ids.insert(record.id, key);
                slot.insert(record.clone());
                ClaimOutcome::Claimed(record)
            }
        };
        // A claim on disk turns a restart inside the lease into `InFlight`.
        if let ClaimOutcome::Claimed(record) = &outcome {
            self.append_journal(record, None);
        }
        outcome
    }

    /// Mark the claimed attempt sent and advance the enrollment past the step,
    /// both under the scheduled-email entry lock. The record is marked sent
    /// even if the enrollment has vanished so the step is never sent twice.
    pub fn commit_sent(
        &self,
        key: DispatchKey,
        now: DateTime<Utc>,
        provider_message_id: Option<String>,
        sequence_len: u32,
    ) -> DripResult<(ScheduledEmail, SequenceEnrollment)> {
        let (scheduled, enrollment) = {
            let mut scheduled = self
                .scheduled
                .get_mut(&key)
                .ok_or_else(|| DripError::Storage(format!("no dispatch record for {:?}", key)))?;

            if scheduled.status == ScheduledStatus::Sent {
                return Err(DripError::Storage(format!(
                    "dispatch record {} is already sent",
                    scheduled.id
                )));
            }

            scheduled.status = ScheduledStatus::Sent;
            scheduled.sent_at = Some(now);
            scheduled.claimed_at = None;
            scheduled.last_error = None;
            scheduled.provider_message_id = provider_message_id;

            let enrollment = self.enrollments.get_mut(&key.enrollment_id).map(|mut enrollment| {
                advance_past(&self.state_machine, &mut enrollment, key.step_index, now, sequence_len);
                enrollment.clone()
            });
            (scheduled.clone(), enrollment)
        };

        self.append_journal(&scheduled, enrollment.as_ref());
        let enrollment = enrollment.ok_or_else(|| {
            DripError::Storage(format!(
                "enrollment {} vanished after send",
                key.enrollment_id
            ))
        })?;
        Ok((scheduled, enrollment))
    }

    /// Record a failed attempt. Once `max_attempts` is reached a live
    /// enrollment is abandoned.
    pub fn record_failure(
        &self,
        key: DispatchKey,
        now: DateTime<Utc>,
        error: &str,
        max_attempts: u32,
    ) -> DripResult<FailureRecord> {
        let (scheduled, abandoned) = {
            let mut scheduled = self
                .scheduled
                .get_mut(&key)
                .ok_or_else(|| DripError::Storage(format!("no dispatch record for {:?}", key)))?;

            scheduled.status = ScheduledStatus::Failed;
            scheduled.claimed_at = None;
            scheduled.last_error = Some(error.to_string());

            let mut abandoned = None;
            if scheduled.attempts >= max_attempts {
                if let Some(mut enrollment) = self.enrollments.get_mut(&key.enrollment_id) {
                    if enrollment.current_step == key.step_index
                        && self
                            .state_machine
                            .can_transition(enrollment.status, EnrollmentStatus::Abandoned)
                    {
                        enrollment.status = EnrollmentStatus::Abandoned;
                        enrollment.updated_at = now;
                        abandoned = Some(enrollment.clone());
                    }
                }
            }
            (scheduled.clone(), abandoned)
        };

        self.append_journal(&scheduled, abandoned.as_ref());
        Ok(FailureRecord {
            scheduled,
            abandoned: abandoned.is_some(),
        })
    }

    /// Advance an enrollment whose current step already has a sent record
    /// (a crash between send and commit). Returns the updated enrollment when
    /// a repair happened.
    pub fn reconcile_sent(
        &self,
        key: DispatchKey,
        sequence_len: u32,
    ) -> DripResult<Option<SequenceEnrollment>> {
        let (scheduled, enrollment) = {
            let Some(scheduled) = self.scheduled.get(&key) else {
                return Ok(None);
            };
            let Some(sent_at) =
                scheduled.sent_at.filter(|_| scheduled.status == ScheduledStatus::Sent)
            else {
                return Ok(None);
            };

            let mut enrollment = self
                .enrollments
                .get_mut(&key.enrollment_id)
                .ok_or_else(|| DripError::NotFound(format!("enrollment {}", key.enrollment_id)))?;
            if enrollment.current_step != key.step_index {
                return Ok(None);
            }
            advance_past(&self.state_machine, &mut enrollment, key.step_index, sent_at, sequence_len);
            (scheduled.clone(), enrollment.clone())
        };

        self.append_journal(&scheduled, Some(&enrollment));
        Ok(Some(enrollment))
    }

    pub fn scheduled_email(&self, key: &DispatchKey) -> Option<ScheduledEmail> {
        self.scheduled.get(key).map(|r| r.clone())
    }

    pub fn scheduled_email_by_id(&self, id: &Uuid) -> Option<ScheduledEmail> {
        let key = self.scheduled_ids.get(id).map(|r| *r)?;
        self.scheduled_email(&key)
    }

    pub fn scheduled_for_enrollment(&self, enrollment_id: &Uuid) -> Vec<ScheduledEmail> {
        let mut records: Vec<ScheduledEmail> = self
            .scheduled
            .iter()
            .filter(|r| r.enrollment_id == *enrollment_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by_key(|r| r.step_index);
        records
    }

    // ─── Analytics ──────────────────────────────────────────────────────────

    pub fn append_analytics(&self, event: EmailAnalytics) {
        self.analytics.write().push(event);
    }

    pub fn analytics_events(&self) -> Vec<EmailAnalytics> {
        self.analytics.read().clone()
    }

    pub fn analytics_where(&self, pred: impl Fn(&EmailAnalytics) -> bool) -> Vec<EmailAnalytics> {
        self.analytics.read().iter().filter(|e| pred(e)).cloned().collect()
    }

    // ─── Persistence ────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            taken_at: Utc::now(),
            subscribers: self.subscribers.iter().map(|r| r.value().clone()).collect(),
            sequences: self.list_sequences(),
            routes: self
                .source_routes
                .iter()
                .map(|r| (*r.key(), *r.value()))
                .collect(),
            enrollments: self.enrollments.iter().map(|r| r.value().clone()).collect(),
            scheduled_emails: self.scheduled.iter().map(|r| r.value().clone()).collect(),
            analytics: self.analytics_events(),
        }
    }

    /// Rebuild a store, including its uniqueness indexes, from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        for subscriber in snapshot.subscribers {
            store
                .subscriber_emails
                .insert(subscriber.email.clone(), subscriber.id);
            store.subscribers.insert(subscriber.id, subscriber);
        }
        for sequence in snapshot.sequences {
            store.sequences.insert(sequence.id, sequence);
        }
        for (source, sequence_id) in snapshot.routes {
            store.source_routes.insert(source, sequence_id);
        }
        for enrollment in snapshot.enrollments {
            store.enrollment_pairs.insert(
                (enrollment.subscriber_id, enrollment.sequence_id),
                enrollment.id,
            );
            store.enrollments.insert(enrollment.id, enrollment);
        }
        for scheduled in snapshot.scheduled_emails {
            store.scheduled_ids.insert(scheduled.id, scheduled.key());
            store.scheduled.insert(scheduled.key(), scheduled);
        }
        *store.analytics.write() = snapshot.analytics;
        store
    }

    /// Write a snapshot to `path`, then empty the attached journal if it
    /// belongs to that snapshot. Concurrent saves run one at a time.
    pub fn save_to(&self, path: &Path) -> DripResult<()> {
        // Held from snapshot to truncate: a change journaled meanwhile lands
        // after the truncate and is replayed on the next load.
        let mut journal = self.journal.lock();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        // Write-then-rename so a crash never leaves a truncated snapshot.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        if let Some(journal) = journal.as_mut().filter(|j| j.path == journal_path(path)) {
            journal.file.set_len(0)?;
        }
        debug!(path = %path.display(), "Store snapshot saved");
        Ok(())
    }

    /// Load a snapshot from disk and replay its journal; `None` when neither
    /// file exists yet.
    pub fn load_from(path: &Path) -> DripResult<Option<Self>> {
        let journal = journal_path(path);
        let store = if path.exists() {
            let json = std::fs::read_to_string(path)?;
            let snapshot: StoreSnapshot = serde_json::from_str(&json)?;
            Self::from_snapshot(snapshot)
        } else if journal.exists() {
            Self::new()
        } else {
            return Ok(None);
        };

        if journal.exists() {
            let replayed = store.replay_journal(&journal)?;
            if replayed > 0 {
                info!(path = %journal.display(), entries = replayed, "Replayed dispatch journal");
            }
        }
        Ok(Some(store))
    }

    /// Append every later claim, commit and failure to the journal at `path`.
    pub fn attach_journal(&self, path: &Path) -> DripResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.journal.lock() = Some(Journal {
            path: path.to_path_buf(),
            file,
        });
        debug!(path = %path.display(), "Dispatch journal attached");
        Ok(())
    }

    /// Must be called with no map guard held: `save_to` takes map guards
    /// while holding the journal lock.
    fn append_journal(&self, scheduled: &ScheduledEmail, enrollment: Option<&SequenceEnrollment>) {
        let mut guard = self.journal.lock();
        let Some(journal) = guard.as_mut() else {
            return;
        };
        let entry = JournalEntry {
            scheduled: scheduled.clone(),
            enrollment: enrollment.cloned(),
        };
        if let Err(e) = write_journal_line(&mut journal.file, &entry) {
            error!(
                path = %journal.path.display(),
                scheduled_email_id = %scheduled.id,
                error = %e,
                "Failed to append dispatch journal"
            );
        }
    }

    fn replay_journal(&self, path: &Path) -> DripResult<usize> {
        let contents = std::fs::read_to_string(path)?;
        let mut replayed = 0;
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => {
                    self.apply_journal_entry(entry);
                    replayed += 1;
                }
                Err(e) => {
                    // A torn final line from a crash mid-append.
                    warn!(line = line_no + 1, error = %e, "Stopping journal replay at unreadable line");
                    break;
                }
            }
        }
        Ok(replayed)
    }

    fn apply_journal_entry(&self, entry: JournalEntry) {
        let key = entry.scheduled.key();
        let downgrade = self.scheduled.get(&key).is_some_and(|existing| {
            existing.status == ScheduledStatus::Sent && entry.scheduled.status != ScheduledStatus::Sent
        });
        if !downgrade {
            self.scheduled_ids.insert(entry.scheduled.id, key);
            self.scheduled.insert(key, entry.scheduled);
        }

        let Some(enrollment) = entry.enrollment else {
            return;
        };
        match self.enrollments.entry(enrollment.id) {
            Entry::Occupied(mut existing) => {
                let current = existing.get();
                if enrollment.current_step >= current.current_step
                    && enrollment.updated_at >= current.updated_at
                {
                    existing.insert(enrollment);
                }
            }
            Entry::Vacant(slot) => {
                self.enrollment_pairs
                    .insert((enrollment.subscriber_id, enrollment.sequence_id), enrollment.id);
                slot.insert(enrollment);
            }
        }
    }
}

fn write_journal_line(file: &mut File, entry: &JournalEntry) -> DripResult<()> {
    let line = serde_json::to_string(entry)?;
    writeln!(file, "{}", line)?;
    file.sync_data()?;
    Ok(())
}

fn advance_past(
    state_machine: &EnrollmentStateMachine,
    enrollment: &mut SequenceEnrollment,
    step_index: u32,
    sent_at: DateTime<Utc>,
    sequence_len: u32,
) {
    // Progress is monotonic: only move forward from the step that was sent.
    if enrollment.current_step != step_index {
        return;
    }
    enrollment.current_step = step_index + 1;
    enrollment.last_step_sent_at = Some(sent_at);
    enrollment.updated_at = sent_at;
    if enrollment.current_step >= sequence_len
        && state_machine.can_transition(enrollment.status, EnrollmentStatus::Completed)
    {
        enrollment.status = EnrollmentStatus::Completed;
    }
}

/// Serializable image of the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub taken_at: DateTime<Utc>,
    pub subscribers: Vec<EmailSubscriber>,
    pub sequences: Vec<EmailSequence>,
    pub routes: Vec<(ContactSource, Uuid)>,
    pub enrollments: Vec<SequenceEnrollment>,
    pub scheduled_emails: Vec<ScheduledEmail>,
    pub analytics: Vec<EmailAnalytics>,
}
