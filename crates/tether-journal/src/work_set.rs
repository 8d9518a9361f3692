//! The batch of pending mutations one replay pass produces (§3.3 Execute,
//! §4.1 step 4-5). Committed to the store in a single CAS update
//! (`ApplyWorkSet`, §4.5).

use chrono::{DateTime, Utc};

use tether_types::{AwaitedEventRecord, ExecutionError, HistoryEntry, Payload};

/// How the replay pass that produced this work set ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    Succeeded(Payload),
    Failed(ExecutionError),
}

/// The accumulated output of one replay pass.
///
/// A work set produced by a pass that suspended carries pending actions
/// only (new history entries, new waiters, an advanced `execute_after`)
/// and no `completion` (§4.1 step 5). A pass that ran to completion or
/// threw a non-suspension error carries a `completion` and no further
/// pending actions beyond what was accumulated before returning.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkSet {
    /// Newly scheduled activities/sub-orchestrators, newly armed timers,
    /// and external-event waits resolved synchronously from a pending
    /// queue payload (already `Succeeded` when pushed here).
    pub new_history_entries: Vec<HistoryEntry>,

    /// Event names consumed synchronously this pass, one entry per
    /// `RecordEventConsumed` action, in the order they were consumed —
    /// applying this work set pops exactly that many payloads off the
    /// front of `event_queues[name]` for each named entry.
    pub queue_consumptions: Vec<String>,

    /// New `AddWaiter` slots appended to `awaited_events` this pass.
    pub new_waiters: Vec<AwaitedEventRecord>,

    /// The minimum of the instance's current `execute_after` and any
    /// timer armed this pass, if lower.
    pub execute_after: Option<DateTime<Utc>>,

    pub completion: Option<Completion>,
}

impl WorkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_suspension(&self) -> bool {
        self.completion.is_none()
    }

    pub fn schedule_child(&mut self, entry: HistoryEntry) {
        self.new_history_entries.push(entry);
    }

    pub fn advance_execute_after(&mut self, candidate: DateTime<Utc>) {
        self.execute_after = Some(match self.execute_after {
            Some(current) if current <= candidate => current,
            _ => candidate,
        });
    }

    pub fn complete(&mut self, completion: Completion) {
        self.completion = Some(completion);
    }
}
