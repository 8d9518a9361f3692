//! Instance invariant checking (§3.1 I1-I5).
//!
//! [`check_apply`] validates a proposed [`crate::WorkSet`] against the
//! current state of an instance *before* it is committed, so a violation
//! aborts the commit rather than corrupting the record. [`validate_instance`]
//! re-scans an already-committed record end to end, useful for tests and
//! for auditing a store after recovery.
//!
//! Checks are grouped by invariant:
//! - [`structural`] (I1, I4 uniqueness): terminal finality, no duplicate
//!   child ids.
//! - [`lease`] (I3): lease fields are both-null or both-set.
//! - [`events`] (I5): `awaited_events` only ever grows by append.

pub mod events;
pub mod lease;
pub mod structural;

use std::collections::HashSet;

use tether_types::{InstanceId, InstanceRecord};

use crate::error::{JournalError, JournalViolation};
use crate::resolution::known_child_ids;
use crate::work_set::WorkSet;

/// Accumulated facts about an instance needed to validate a work set
/// commit in O(1) rather than re-scanning the full history each time.
#[derive(Debug, Clone)]
pub struct InvariantState {
    pub instance_id: InstanceId,
    pub is_completed: bool,
    pub known_child_ids: HashSet<InstanceId>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub awaited_len: usize,
}

impl InvariantState {
    pub fn from_record(record: &InstanceRecord) -> Self {
        Self {
            instance_id: record.instance_id.clone(),
            is_completed: record.is_completed,
            known_child_ids: known_child_ids(&record.history),
            lease_owner: record.lease_owner.clone(),
            lease_expires_at: record.lease_expires_at,
            awaited_len: record.awaited_events.len(),
        }
    }
}

/// Validate a proposed work set against an instance's current state.
/// Checks run in the order structural -> lease -> events, matching the
/// dependency order: terminal finality gates everything else.
pub fn check_apply(state: &InvariantState, work_set: &WorkSet) -> Result<(), JournalError> {
    structural::check(state, work_set)?;
    lease::check(state)?;
    events::check(state, work_set)?;
    Ok(())
}

/// Full scan of an already-committed instance, re-deriving the same facts
/// `InvariantState` tracks incrementally and asserting none of I1/I3/I4
/// have been violated. Used by tests and by offline auditing.
pub fn validate_instance(record: &InstanceRecord) -> Result<(), JournalError> {
    let mut seen = HashSet::new();
    for entry in &record.history {
        if !seen.insert(entry.child_instance_id.clone()) {
            return Err(JournalViolation::DuplicateHistoryEntry {
                child_instance_id: entry.child_instance_id.clone(),
            }
            .into());
        }
    }

    if record.lease_owner.is_some() != record.lease_expires_at.is_some() {
        return Err(JournalViolation::LeaseFieldsInconsistent {
            instance_id: record.instance_id.clone(),
        }
        .into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_set::Completion;
    use chrono::Utc;
    use tether_types::{Codec, HistoryEntry, Payload};

    fn base_record() -> InstanceRecord {
        InstanceRecord::new(
            InstanceId::new("i1"),
            "O",
            Payload::new(vec![], Codec::Json),
            None,
            Utc::now(),
        )
    }

    #[test]
    fn fresh_instance_accepts_a_suspending_work_set() {
        let record = base_record();
        let state = InvariantState::from_record(&record);
        let mut ws = WorkSet::new();
        ws.schedule_child(HistoryEntry::scheduled_activity(
            InstanceId::new("c1"),
            "F",
            Payload::new(vec![], Codec::Json),
            Utc::now(),
        ));
        assert!(check_apply(&state, &ws).is_ok());
    }

    #[test]
    fn completed_instance_rejects_any_further_work_set() {
        let mut record = base_record();
        record.is_completed = true;
        let state = InvariantState::from_record(&record);
        let mut ws = WorkSet::new();
        ws.complete(Completion::Succeeded(Payload::new(vec![], Codec::Json)));
        let err = check_apply(&state, &ws).unwrap_err();
        assert!(matches!(
            err.violation,
            JournalViolation::TerminalMutationAttempted { .. }
        ));
    }

    #[test]
    fn validate_instance_rejects_duplicate_child_ids() {
        let mut record = base_record();
        let e1 = HistoryEntry::scheduled_activity(
            InstanceId::new("c1"),
            "F",
            Payload::new(vec![], Codec::Json),
            Utc::now(),
        );
        record.history.push(e1.clone());
        record.history.push(e1);
        let err = validate_instance(&record).unwrap_err();
        assert!(matches!(
            err.violation,
            JournalViolation::DuplicateHistoryEntry { .. }
        ));
    }
}
