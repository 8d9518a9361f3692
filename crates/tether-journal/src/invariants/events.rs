//! I5: `awaited_events` is a function of deterministic replay up to the
//! current suspension — it only ever grows, by appending new slots in
//! the order the orchestrator created them. A commit may never shrink it
//! or splice into its existing prefix.

use super::InvariantState;
use crate::error::JournalViolation;
use crate::work_set::WorkSet;

pub(crate) fn check(state: &InvariantState, work_set: &WorkSet) -> Result<(), JournalViolation> {
    let proposed_len = state.awaited_len + work_set.new_waiters.len();
    if proposed_len < state.awaited_len {
        return Err(JournalViolation::AwaitedEventsRegressed {
            instance_id: state.instance_id.clone(),
            previous_len: state.awaited_len,
            proposed_len,
        });
    }
    Ok(())
}
