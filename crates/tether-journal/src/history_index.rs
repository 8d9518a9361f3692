//! A by-id lookup over an instance's history, built once per replay pass
//! (§4.1 step 3 "looks up the matching history entry by id"). Mirrors a
//! replay cache: a read-only index over already-durable decisions, built
//! fresh from the history slice handed to each pass.

use std::collections::HashMap;

use tether_types::{HistoryEntry, HistoryStatus, InstanceId};

pub struct HistoryIndex<'a> {
    entries: &'a [HistoryEntry],
    by_id: HashMap<&'a InstanceId, usize>,
}

impl<'a> HistoryIndex<'a> {
    pub fn build(entries: &'a [HistoryEntry]) -> Self {
        let by_id = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (&e.child_instance_id, i))
            .collect();
        Self { entries, by_id }
    }

    pub fn lookup(&self, child_instance_id: &InstanceId) -> Option<&'a HistoryEntry> {
        self.by_id.get(child_instance_id).map(|&i| &self.entries[i])
    }

    /// The history entry recorded at ordinal position `ordinal`, if the
    /// history is at least that long. Used to detect a divergent replay
    /// (P11): a call site whose freshly-derived id doesn't match what was
    /// recorded the first time this ordinal was reached still has *some*
    /// entry there, distinguishing "nondeterministic call" from "genuinely
    /// new call past the end of history".
    pub fn at(&self, ordinal: usize) -> Option<&'a HistoryEntry> {
        self.entries.get(ordinal)
    }

    pub fn status(&self, child_instance_id: &InstanceId) -> Option<HistoryStatus> {
        self.lookup(child_instance_id).map(|e| e.status)
    }

    pub fn contains(&self, child_instance_id: &InstanceId) -> bool {
        self.by_id.contains_key(child_instance_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
