use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution_error::ExecutionError;
use crate::history::{AwaitedEventRecord, HistoryEntry};
use crate::ids::InstanceId;
use crate::payload::Payload;

/// The runtime status surfaced to clients (§6.2). Derived from an
/// `InstanceRecord`, never stored directly — see `tether_journal::status`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Terminated,
}

/// The durable record of one orchestrator or activity invocation (§3.1).
///
/// `history` is insertion-ordered, mirroring the append-only shape of the
/// journal it is modeled on; child instance ids are unique within it (I4),
/// enforced by `tether_journal`'s invariant checks rather than by using a
/// map here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub function_name: String,
    pub input: Payload,
    pub parent_instance_id: Option<InstanceId>,

    pub execute_after: DateTime<Utc>,

    pub history: Vec<HistoryEntry>,
    pub event_queues: HashMap<String, VecDeque<Payload>>,
    pub awaited_events: VecDeque<AwaitedEventRecord>,

    pub is_completed: bool,
    pub completed_result: Option<Payload>,
    pub completed_error: Option<ExecutionError>,

    pub version: u64,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InstanceRecord {
    /// Create a fresh instance per §3.3 Create: empty history and events,
    /// `execute_after = now`, `version = 0`, no lease.
    pub fn new(
        instance_id: InstanceId,
        function_name: impl Into<String>,
        input: Payload,
        parent_instance_id: Option<InstanceId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id,
            function_name: function_name.into(),
            input,
            parent_instance_id,
            execute_after: now,
            history: Vec::new(),
            event_queues: HashMap::new(),
            awaited_events: VecDeque::new(),
            is_completed: false,
            completed_result: None,
            completed_error: None,
            version: 0,
            lease_owner: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_leased(&self) -> bool {
        self.lease_owner.is_some()
    }

    pub fn lease_is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.lease_expires_at {
            Some(expires) => expires <= now,
            None => true,
        }
    }

    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        !self.is_completed && self.execute_after <= now && (!self.is_leased() || self.lease_is_expired(now))
    }

    pub fn history_entry(&self, child_instance_id: &InstanceId) -> Option<&HistoryEntry> {
        self.history.iter().find(|e| &e.child_instance_id == child_instance_id)
    }

    pub fn history_entry_mut(&mut self, child_instance_id: &InstanceId) -> Option<&mut HistoryEntry> {
        self.history
            .iter_mut()
            .find(|e| &e.child_instance_id == child_instance_id)
    }
}

/// The lightweight projection `GetReadyCandidates` returns (§4.3 step 1):
/// enough to attempt a lease claim without paying for the full history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceProjection {
    pub instance_id: InstanceId,
    pub function_name: String,
    pub execute_after: DateTime<Utc>,
    pub version: u64,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl From<&InstanceRecord> for InstanceProjection {
    fn from(record: &InstanceRecord) -> Self {
        Self {
            instance_id: record.instance_id.clone(),
            function_name: record.function_name.clone(),
            execute_after: record.execute_after,
            version: record.version,
            lease_owner: record.lease_owner.clone(),
            lease_expires_at: record.lease_expires_at,
        }
    }
}
