//! Free scan/lookup helpers over instance state, and the checked
//! transition wrapper that enforces I2 wherever an existing history entry
//! is resolved (child completion, timer fire, event delivery).

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tether_types::{AwaitedEventRecord, ExecutionError, HistoryEntry, HistoryStatus, InstanceId, Payload};

use crate::error::JournalViolation;

/// Resolve a `Scheduled` history entry to `Succeeded`, enforcing I2.
///
/// Used by the three out-of-band mutation sites that resolve an existing
/// entry rather than add a new one: child completion wake (§3.3), timer
/// fire (§4.2.3), and event delivery (§4.2.4).
pub fn try_succeed(entry: &mut HistoryEntry, result: Payload, now: DateTime<Utc>) -> Result<(), JournalViolation> {
    if entry.status != HistoryStatus::Scheduled {
        return Err(JournalViolation::HistoryEntryRegressed {
            child_instance_id: entry.child_instance_id.clone(),
            from: entry.status,
            to: HistoryStatus::Succeeded,
        });
    }
    entry.succeed(result, now);
    Ok(())
}

/// Resolve a `Scheduled` history entry to `Failed`, enforcing I2.
pub fn try_fail(entry: &mut HistoryEntry, error: ExecutionError, now: DateTime<Utc>) -> Result<(), JournalViolation> {
    if entry.status != HistoryStatus::Scheduled {
        return Err(JournalViolation::HistoryEntryRegressed {
            child_instance_id: entry.child_instance_id.clone(),
            from: entry.status,
            to: HistoryStatus::Failed,
        });
    }
    entry.fail(error, now);
    Ok(())
}

/// Every history entry still awaiting resolution (kind = activity,
/// sub_orchestrator, or timer; status = scheduled).
pub fn pending_entries(history: &[HistoryEntry]) -> impl Iterator<Item = &HistoryEntry> {
    history.iter().filter(|e| e.status == HistoryStatus::Scheduled)
}

/// The earliest (FIFO-first) waiter for `event_name`, if any (§4.2.4,
/// §4.5 `RaiseEvent`: "if the earliest waiter for `event_name` exists").
pub fn earliest_waiter<'a>(
    awaited_events: &'a VecDeque<AwaitedEventRecord>,
    event_name: &str,
) -> Option<&'a AwaitedEventRecord> {
    awaited_events.iter().find(|w| w.name == event_name)
}

/// Remove and return the earliest waiter for `event_name`, preserving the
/// relative order of all other waiters.
pub fn take_earliest_waiter(
    awaited_events: &mut VecDeque<AwaitedEventRecord>,
    event_name: &str,
) -> Option<AwaitedEventRecord> {
    let index = awaited_events.iter().position(|w| w.name == event_name)?;
    awaited_events.remove(index)
}

/// The minimum of two timestamps, used to advance `execute_after` only
/// forward-in-urgency (§4.2.3: "set to the minimum of its current value
/// and `fire_at`").
pub fn earlier(a: DateTime<Utc>, b: DateTime<Utc>) -> DateTime<Utc> {
    if a <= b { a } else { b }
}

/// All child instance ids already present in `history`, for O(1)
/// duplicate detection against a work set's new entries (I4 uniqueness).
pub fn known_child_ids(history: &[HistoryEntry]) -> std::collections::HashSet<InstanceId> {
    history.iter().map(|e| e.child_instance_id.clone()).collect()
}
