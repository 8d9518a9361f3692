use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution_error::ExecutionError;
use crate::ids::InstanceId;
use crate::payload::Payload;

/// What kind of suspending call a history entry represents (§3.2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryKind {
    Activity,
    SubOrchestrator,
    Timer,
    ExternalEvent,
}

impl HistoryKind {
    pub fn name(&self) -> &'static str {
        match self {
            HistoryKind::Activity => "activity",
            HistoryKind::SubOrchestrator => "sub_orchestrator",
            HistoryKind::Timer => "timer",
            HistoryKind::ExternalEvent => "external_event",
        }
    }
}

/// The outcome of a history entry. Transitions only `Scheduled` →
/// `{Succeeded, Failed}`, never back (I2).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryStatus {
    Scheduled,
    Succeeded,
    Failed,
}

impl HistoryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HistoryStatus::Succeeded | HistoryStatus::Failed)
    }
}

/// One durable row in an instance's history (§3.2): a single suspending
/// call the orchestrator made at a specific point in its code, and its
/// outcome once resolved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub child_instance_id: InstanceId,
    pub kind: HistoryKind,

    /// Callee, for `Activity` / `SubOrchestrator`.
    pub function_name: Option<String>,
    /// Argument passed, for `Activity` / `SubOrchestrator`.
    pub input: Option<Payload>,

    /// Expiry, for `Timer`.
    pub fire_at: Option<DateTime<Utc>>,

    /// Awaited name, for `ExternalEvent`.
    pub event_name: Option<String>,

    pub status: HistoryStatus,
    pub result: Option<Payload>,
    pub error: Option<ExecutionError>,

    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl HistoryEntry {
    pub fn scheduled_activity(
        child_instance_id: InstanceId,
        function_name: impl Into<String>,
        input: Payload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            child_instance_id,
            kind: HistoryKind::Activity,
            function_name: Some(function_name.into()),
            input: Some(input),
            fire_at: None,
            event_name: None,
            status: HistoryStatus::Scheduled,
            result: None,
            error: None,
            initiated_at: now,
            completed_at: None,
        }
    }

    pub fn scheduled_sub_orchestrator(
        child_instance_id: InstanceId,
        function_name: impl Into<String>,
        input: Payload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: HistoryKind::SubOrchestrator,
            ..Self::scheduled_activity(child_instance_id, function_name, input, now)
        }
    }

    pub fn armed_timer(child_instance_id: InstanceId, fire_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            child_instance_id,
            kind: HistoryKind::Timer,
            function_name: None,
            input: None,
            fire_at: Some(fire_at),
            event_name: None,
            status: HistoryStatus::Scheduled,
            result: None,
            error: None,
            initiated_at: now,
            completed_at: None,
        }
    }

    pub fn waiting_for_event(
        child_instance_id: InstanceId,
        event_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            child_instance_id,
            kind: HistoryKind::ExternalEvent,
            function_name: None,
            input: None,
            fire_at: None,
            event_name: Some(event_name.into()),
            status: HistoryStatus::Scheduled,
            result: None,
            error: None,
            initiated_at: now,
            completed_at: None,
        }
    }

    pub fn succeed(&mut self, result: Payload, now: DateTime<Utc>) {
        self.status = HistoryStatus::Succeeded;
        self.result = Some(result);
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: ExecutionError, now: DateTime<Utc>) {
        self.status = HistoryStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(now);
    }
}

/// One slot in the FIFO of awaited-event calls an orchestrator has made
/// (§3.1 `awaited_events`, §4.2.4). `slot_id` is the deterministic child id
/// of the matching `ExternalEvent` history entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwaitedEventRecord {
    pub name: String,
    pub slot_id: InstanceId,
}
