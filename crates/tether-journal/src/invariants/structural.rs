//! I1 (terminal finality) and the uniqueness clause of I4.

use super::InvariantState;
use crate::error::JournalViolation;
use crate::work_set::WorkSet;

/// Validate structural invariants against a proposed work set.
///
/// I1 is checked first: once `is_completed`, no other check matters
/// because no mutation is permitted at all.
pub(crate) fn check(state: &InvariantState, work_set: &WorkSet) -> Result<(), JournalViolation> {
    let touches_anything =
        !work_set.new_history_entries.is_empty() || !work_set.new_waiters.is_empty() || work_set.completion.is_some();

    if state.is_completed && touches_anything {
        return Err(JournalViolation::TerminalMutationAttempted {
            instance_id: state.instance_id.clone(),
        });
    }

    for entry in &work_set.new_history_entries {
        if state.known_child_ids.contains(&entry.child_instance_id) {
            return Err(JournalViolation::DuplicateHistoryEntry {
                child_instance_id: entry.child_instance_id.clone(),
            });
        }
    }

    Ok(())
}
