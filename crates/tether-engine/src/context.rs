//! The orchestration context (§4.2): the API an orchestrator function sees.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tether_journal::{HistoryIndex, WorkSet};
use tether_types::{AwaitedEventRecord, CallSite, ErrorKind, ExecutionError, HistoryEntry, HistoryStatus, InstanceId, Payload, derive_child_id};

/// What an orchestration context call raises instead of returning
/// synchronously (§5 "Suspension points", §9 "thrown sentinel"). User
/// orchestrator code propagates this with `?`; the replay executor is the
/// only thing that ever matches on it directly.
#[derive(Debug, Clone)]
pub enum OrchestrationError {
    /// The matching history entry does not exist yet (or does, but is
    /// still `Scheduled`): this pass has nothing more to do and must
    /// suspend. Always propagated with `?`, never inspected by user code.
    Suspend,
    /// The matching history entry resolved `Failed`: reconstructed and
    /// handed to user code, which may catch it and continue (§4.1).
    Failed(ExecutionError),
}

/// A fresh context bound to one instance's input and existing history for
/// exactly one replay pass (§4.1 step 1).
pub struct OrchestrationContext<'a> {
    instance_id: InstanceId,
    parent_instance_id: Option<InstanceId>,
    function_name: String,
    input: Payload,
    history: HistoryIndex<'a>,
    pending_queue_pops: std::collections::HashMap<String, usize>,
    /// Peeks the event queue for `name` at virtual offset `offset` (0 =
    /// the front, accounting for slots already consumed earlier in this
    /// same pass). Read-only: actual consumption happens when the work
    /// set is committed.
    queue_peek: Box<dyn Fn(&str, usize) -> Option<Payload> + 'a>,
    now: DateTime<Utc>,
    next_ordinal: u32,
    past_watermark: bool,
    work_set: WorkSet,
}

impl<'a> OrchestrationContext<'a> {
    pub fn new(
        instance_id: InstanceId,
        parent_instance_id: Option<InstanceId>,
        function_name: String,
        input: Payload,
        history: HistoryIndex<'a>,
        queue_peek: impl Fn(&str, usize) -> Option<Payload> + 'a,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id,
            parent_instance_id,
            function_name,
            input,
            history,
            pending_queue_pops: std::collections::HashMap::new(),
            queue_peek: Box::new(queue_peek),
            now,
            next_ordinal: 0,
            past_watermark: false,
            work_set: WorkSet::new(),
        }
    }

    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn parent_instance_id(&self) -> Option<&InstanceId> {
        self.parent_instance_id.as_ref()
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    /// §4.2.5: frozen for the whole pass, stable across replays of the
    /// same pass.
    pub fn current_utc_date_time(&self) -> DateTime<Utc> {
        self.now
    }

    /// §4.2.5 `GetInput<T>`.
    pub fn get_input<T: for<'de> serde::Deserialize<'de>>(&self) -> serde_json::Result<T> {
        self.input.as_json()
    }

    /// Replay-safe logging (§4.2.5, §9): dropped while still inside
    /// already-completed history, passed through once this pass reaches
    /// its first new decision.
    pub fn log(&self, message: impl std::fmt::Display) {
        if self.past_watermark {
            tracing::info!(instance_id = %self.instance_id, "{message}");
        }
    }

    fn next_ordinal(&mut self) -> u32 {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        ordinal
    }

    pub(crate) fn into_work_set(self) -> WorkSet {
        self.work_set
    }

    /// §4.2.1 `CallAsync`.
    pub fn call_async(&mut self, function_name: &str, input: Payload) -> Result<Payload, OrchestrationError> {
        self.call(CallKind::Activity, function_name, input)
    }

    /// §4.2.2 `CallSubOrchestratorAsync`.
    pub fn call_sub_orchestrator_async(&mut self, function_name: &str, input: Payload) -> Result<Payload, OrchestrationError> {
        self.call(CallKind::SubOrchestrator, function_name, input)
    }

    fn call(&mut self, kind: CallKind, function_name: &str, input: Payload) -> Result<Payload, OrchestrationError> {
        let ordinal = self.next_ordinal();
        let site = match kind {
            CallKind::Activity => CallSite::Activity(function_name),
            CallKind::SubOrchestrator => CallSite::SubOrchestrator(function_name),
        };
        let child_id = derive_child_id(&self.instance_id, site, ordinal, &input.bytes);

        if let Some(entry) = self.history.lookup(&child_id) {
            return self.resolve_existing(entry);
        }
        self.reject_divergence(ordinal, &child_id)?;

        self.past_watermark = true;
        let entry = match kind {
            CallKind::Activity => HistoryEntry::scheduled_activity(child_id, function_name, input, self.now),
            CallKind::SubOrchestrator => HistoryEntry::scheduled_sub_orchestrator(child_id, function_name, input, self.now),
        };
        self.work_set.schedule_child(entry);
        Err(OrchestrationError::Suspend)
    }

    /// §4.2.3 `CreateTimer`.
    pub fn create_timer(&mut self, fire_at: DateTime<Utc>) -> Result<(), OrchestrationError> {
        let ordinal = self.next_ordinal();
        let child_id = derive_child_id(&self.instance_id, CallSite::Timer, ordinal, &[]);

        if let Some(entry) = self.history.lookup(&child_id) {
            return self.resolve_existing(entry).map(|_| ());
        }
        self.reject_divergence(ordinal, &child_id)?;

        self.past_watermark = true;
        let entry = HistoryEntry::armed_timer(child_id, fire_at, self.now);
        self.work_set.advance_execute_after(fire_at);
        self.work_set.schedule_child(entry);
        Err(OrchestrationError::Suspend)
    }

    /// Convenience over `create_timer` taking a relative duration from the
    /// frozen replay clock (§4.2.3: "derived from `CurrentUtcDateTime`").
    pub fn create_timer_after(&mut self, duration: Duration) -> Result<(), OrchestrationError> {
        self.create_timer(self.now + duration)
    }

    /// §4.2.4 `WaitForEvent`.
    pub fn wait_for_event(&mut self, event_name: &str) -> Result<Payload, OrchestrationError> {
        let ordinal = self.next_ordinal();
        let child_id = derive_child_id(&self.instance_id, CallSite::ExternalEvent(event_name), ordinal, &[]);

        if let Some(entry) = self.history.lookup(&child_id) {
            return self.resolve_existing(entry);
        }
        self.reject_divergence(ordinal, &child_id)?;

        self.past_watermark = true;

        // Each call creates a new slot, consumed FIFO against this pass's
        // view of `event_queues[event_name]` (§4.2.4). Slots already
        // consumed earlier in this same pass are accounted for in
        // `pending_queue_pops` so two waits on the same name in one pass
        // see a consistent, decreasing view of the queue.
        let offset = *self.pending_queue_pops.get(event_name).unwrap_or(&0);

        if let Some(payload) = (self.queue_peek)(event_name, offset) {
            *self.pending_queue_pops.entry(event_name.to_string()).or_insert(0) += 1;
            self.work_set.queue_consumptions.push(event_name.to_string());
            let mut entry = HistoryEntry::waiting_for_event(child_id, event_name, self.now);
            entry.succeed(payload.clone(), self.now);
            self.work_set.schedule_child(entry);
            return Ok(payload);
        }

        let waiter = AwaitedEventRecord {
            name: event_name.to_string(),
            slot_id: child_id.clone(),
        };
        self.work_set.new_waiters.push(waiter);
        self.work_set.schedule_child(HistoryEntry::waiting_for_event(child_id, event_name, self.now));
        Err(OrchestrationError::Suspend)
    }

    fn resolve_existing(&mut self, entry: &HistoryEntry) -> Result<Payload, OrchestrationError> {
        match entry.status {
            HistoryStatus::Succeeded => Ok(entry.result.clone().unwrap_or_else(|| Payload::new(Vec::new(), tether_types::Codec::Json))),
            HistoryStatus::Failed => Err(OrchestrationError::Failed(
                entry.error.clone().expect("failed history entry always carries an error"),
            )),
            HistoryStatus::Scheduled => Err(OrchestrationError::Suspend),
        }
    }

    /// P11: a call site reached at `ordinal` that doesn't match `child_id`
    /// against `lookup` might still land inside existing history rather
    /// than past its end — that means a previous pass recorded a different
    /// call at this exact point, i.e. the orchestrator diverged between
    /// replays. Fails the instance instead of silently scheduling the new
    /// call and orphaning the old entry.
    fn reject_divergence(&self, ordinal: u32, child_id: &InstanceId) -> Result<(), OrchestrationError> {
        if let Some(stale) = self.history.at(ordinal as usize) {
            if &stale.child_instance_id != child_id {
                return Err(OrchestrationError::Failed(ExecutionError::new(
                    ErrorKind::Determinism,
                    format!(
                        "orchestrator diverged at call ordinal {ordinal}: history has {} but replay computed {child_id}",
                        stale.child_instance_id
                    ),
                )));
            }
        }
        Ok(())
    }
}

enum CallKind {
    Activity,
    SubOrchestrator,
}

/// Serialize a value as an activity/sub-orchestrator call argument.
pub fn input_payload(value: &impl Serialize) -> serde_json::Result<Payload> {
    Payload::json(value)
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};

    use super::*;

    fn payload(n: i64) -> Payload {
        Payload::json(&n).unwrap()
    }

    fn no_queue(_name: &str, _offset: usize) -> Option<Payload> {
        None
    }

    fn ctx<'a>(history: &'a [HistoryEntry], queue_peek: impl Fn(&str, usize) -> Option<Payload> + 'a) -> OrchestrationContext<'a> {
        OrchestrationContext::new(
            InstanceId::new("i1"),
            None,
            "O".to_string(),
            payload(0),
            HistoryIndex::build(history),
            queue_peek,
            Utc::now(),
        )
    }

    #[test]
    fn call_async_suspends_and_schedules_a_new_entry_when_absent() {
        let history = Vec::new();
        let mut context = ctx(&history, no_queue);
        let result = context.call_async("F", payload(1));
        assert!(matches!(result, Err(OrchestrationError::Suspend)));

        let work_set = context.into_work_set();
        assert_eq!(work_set.new_history_entries.len(), 1);
        assert!(work_set.is_suspension());
    }

    #[test]
    fn call_async_resolves_an_existing_succeeded_entry() {
        let child_id = derive_child_id(&InstanceId::new("i1"), CallSite::Activity("F"), 0, &payload(1).bytes);
        let mut entry = HistoryEntry::scheduled_activity(child_id, "F", payload(1), Utc::now());
        entry.succeed(payload(42), Utc::now());
        let history = vec![entry];

        let mut context = ctx(&history, no_queue);
        let result = context.call_async("F", payload(1)).unwrap();
        assert_eq!(result.as_json::<i64>().unwrap(), 42);
    }

    #[test]
    fn call_async_propagates_an_existing_failed_entry() {
        let child_id = derive_child_id(&InstanceId::new("i1"), CallSite::Activity("F"), 0, &payload(1).bytes);
        let mut entry = HistoryEntry::scheduled_activity(child_id, "F", payload(1), Utc::now());
        entry.fail(ExecutionError::new(ErrorKind::UserError, "boom"), Utc::now());
        let history = vec![entry];

        let mut context = ctx(&history, no_queue);
        let err = context.call_async("F", payload(1)).unwrap_err();
        assert!(matches!(err, OrchestrationError::Failed(e) if e.message == "boom"));
    }

    #[test]
    fn diverging_call_at_the_same_ordinal_fails_with_a_determinism_error() {
        let child_id = derive_child_id(&InstanceId::new("i1"), CallSite::Activity("F1"), 0, &payload(1).bytes);
        let entry = HistoryEntry::scheduled_activity(child_id, "F1", payload(1), Utc::now());
        let history = vec![entry];

        // Same ordinal (0), but a replay that calls a different function:
        // this must never be treated as a fresh call.
        let mut context = ctx(&history, no_queue);
        let err = context.call_async("F2", payload(1)).unwrap_err();
        match err {
            OrchestrationError::Failed(e) => assert_eq!(e.kind, ErrorKind::Determinism),
            other => panic!("expected a determinism failure, got {other:?}"),
        }
    }

    #[test]
    fn create_timer_suspends_and_advances_execute_after() {
        let history = Vec::new();
        let fire_at = Utc::now() + Duration::minutes(5);
        let mut context = ctx(&history, no_queue);
        let result = context.create_timer(fire_at);
        assert!(matches!(result, Err(OrchestrationError::Suspend)));

        let work_set = context.into_work_set();
        assert_eq!(work_set.execute_after, Some(fire_at));
        assert_eq!(work_set.new_history_entries.len(), 1);
    }

    #[test]
    fn wait_for_event_returns_a_queued_payload_synchronously() {
        let history = Vec::new();
        let queued = payload(7);
        let queued_for_closure = queued.clone();
        let mut context = ctx(&history, move |name, offset| {
            (name == "E" && offset == 0).then(|| queued_for_closure.clone())
        });

        let result = context.wait_for_event("E").unwrap();
        assert_eq!(result.as_json::<i64>().unwrap(), 7);

        let work_set = context.into_work_set();
        assert_eq!(work_set.new_history_entries.len(), 1);
        assert!(work_set.new_waiters.is_empty());
    }

    #[test]
    fn wait_for_event_suspends_and_registers_a_waiter_when_queue_is_empty() {
        let history = Vec::new();
        let mut context = ctx(&history, no_queue);
        let result = context.wait_for_event("E");
        assert!(matches!(result, Err(OrchestrationError::Suspend)));

        let work_set = context.into_work_set();
        assert_eq!(work_set.new_waiters.len(), 1);
        assert_eq!(work_set.new_waiters[0].name, "E");
    }

    #[test]
    fn two_waits_on_the_same_event_name_in_one_pass_consume_the_queue_fifo() {
        let history = Vec::new();
        let mut queue: HashMap<String, VecDeque<Payload>> = HashMap::new();
        queue.insert("E".to_string(), VecDeque::from(vec![payload(1), payload(2)]));

        let mut context = ctx(&history, move |name, offset| queue.get(name)?.get(offset).cloned());

        let first = context.wait_for_event("E").unwrap();
        let second = context.wait_for_event("E").unwrap();
        assert_eq!(first.as_json::<i64>().unwrap(), 1);
        assert_eq!(second.as_json::<i64>().unwrap(), 2);

        let work_set = context.into_work_set();
        assert_eq!(work_set.queue_consumptions, vec!["E".to_string(), "E".to_string()]);
    }

    #[test]
    fn current_utc_date_time_is_frozen_for_the_whole_pass() {
        let history = Vec::new();
        let context = ctx(&history, no_queue);
        let first = context.current_utc_date_time();
        let second = context.current_utc_date_time();
        assert_eq!(first, second);
    }

    #[test]
    fn get_input_deserializes_the_instance_input() {
        let history = Vec::new();
        let context = OrchestrationContext::new(
            InstanceId::new("i1"),
            None,
            "O".to_string(),
            payload(99),
            HistoryIndex::build(&history),
            no_queue,
            Utc::now(),
        );
        assert_eq!(context.get_input::<i64>().unwrap(), 99);
    }
}
