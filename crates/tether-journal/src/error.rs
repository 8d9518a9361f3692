//! Invariant violations for the instance record (§3.1 I1-I5) and the error
//! type wrapping them.

use std::fmt;

use tether_types::{HistoryStatus, InstanceId};

/// One violated invariant, named by the clause it violates (§3.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JournalViolation {
    /// I1: a work set attempted to mutate an instance that is already
    /// `is_completed`.
    TerminalMutationAttempted { instance_id: InstanceId },

    /// I2: a history entry's status moved somewhere other than
    /// `Scheduled` → `{Succeeded, Failed}`.
    HistoryEntryRegressed {
        child_instance_id: InstanceId,
        from: HistoryStatus,
        to: HistoryStatus,
    },

    /// I4 (uniqueness clause): a work set introduced a child instance id
    /// that already exists in this instance's history.
    DuplicateHistoryEntry { child_instance_id: InstanceId },

    /// I3: `lease_owner` and `lease_expires_at` disagree on null-ness.
    LeaseFieldsInconsistent { instance_id: InstanceId },

    /// I5: `awaited_events` was not a pure, order-preserving append — a
    /// commit attempted to shrink it or reorder an existing slot.
    AwaitedEventsRegressed {
        instance_id: InstanceId,
        previous_len: usize,
        proposed_len: usize,
    },
}

impl fmt::Display for JournalViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalViolation::TerminalMutationAttempted { instance_id } => write!(
                f,
                "I1: instance {instance_id} is already completed; no further mutation is permitted"
            ),
            JournalViolation::HistoryEntryRegressed {
                child_instance_id,
                from,
                to,
            } => write!(
                f,
                "I2: history entry {child_instance_id} attempted {from:?} -> {to:?}; only Scheduled -> {{Succeeded, Failed}} is permitted"
            ),
            JournalViolation::DuplicateHistoryEntry { child_instance_id } => write!(
                f,
                "I4: child instance id {child_instance_id} already exists in this instance's history"
            ),
            JournalViolation::LeaseFieldsInconsistent { instance_id } => write!(
                f,
                "I3: instance {instance_id} has inconsistent lease_owner/lease_expires_at null-ness"
            ),
            JournalViolation::AwaitedEventsRegressed {
                instance_id,
                previous_len,
                proposed_len,
            } => write!(
                f,
                "I5: instance {instance_id} awaited_events shrank or was reordered ({previous_len} -> {proposed_len})"
            ),
        }
    }
}

/// Wrapping error type for invariant checking, matching the crate's
/// `thiserror`-based error style elsewhere in the workspace.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{violation}")]
pub struct JournalError {
    pub violation: JournalViolation,
}

impl From<JournalViolation> for JournalError {
    fn from(violation: JournalViolation) -> Self {
        Self { violation }
    }
}
