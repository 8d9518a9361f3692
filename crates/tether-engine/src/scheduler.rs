//! The scheduler (§4.3): the polling loop that turns ready instances into
//! replay passes, bounded by `max_concurrent_instances` and coordinated
//! across hosts via lease claims.
//!
//! Grounded on the pack's `tokio::task::JoinSet`-bounded dispatch loop: a
//! fixed pool of in-flight instance tasks, refilled from `get_ready_candidates`
//! each tick, with a `tokio::sync::watch` channel for cooperative shutdown.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;

use tether_types::{HistoryKind, HistoryStatus, InstanceRecord};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::lease::LeaseManager;
use crate::registry::FunctionRegistry;
use crate::replay;
use crate::store::StateStore;

pub struct Scheduler<S: StateStore + 'static> {
    store: Arc<S>,
    registry: Arc<FunctionRegistry>,
    config: RuntimeConfig,
    lease_manager: Arc<LeaseManager<S>>,
}

impl<S: StateStore + 'static> Scheduler<S> {
    pub fn new(store: Arc<S>, registry: FunctionRegistry, config: RuntimeConfig) -> Self {
        let lease_manager = Arc::new(LeaseManager::new(store.clone(), config.host_id.clone(), config.lease_duration));
        Self {
            store,
            registry: Arc::new(registry),
            config,
            lease_manager,
        }
    }

    /// Runs the polling loop until `shutdown` fires (§4.3 step 1-4).
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut polling = tokio::time::interval(
            self.config
                .polling_interval
                .to_std()
                .unwrap_or(std::time::Duration::from_millis(100)),
        );

        loop {
            tokio::select! {
                _ = polling.tick() => {
                    self.fill(&mut in_flight).await;
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
    }

    async fn fill(&self, in_flight: &mut JoinSet<()>) {
        let capacity = self.config.max_concurrent_instances.saturating_sub(in_flight.len());
        if capacity == 0 {
            return;
        }

        // Small random jitter on claim order: when many hosts wake on the
        // same tick, this spreads their `TryClaimLease` attempts instead of
        // racing every host through the same candidate ordering every cycle.
        let jitter = std::time::Duration::from_millis(rand::random_range(0..10));
        tokio::time::sleep(jitter).await;

        let candidates = match self.store.get_ready_candidates(Utc::now(), capacity).await {
            Ok(candidates) => candidates,
            Err(error) => {
                tracing::warn!(%error, "failed to poll ready candidates");
                return;
            }
        };

        for candidate in candidates {
            let Ok(Some(guard)) = self.lease_manager.try_claim(&candidate.instance_id).await else {
                continue;
            };

            let store = self.store.clone();
            let registry = self.registry.clone();
            let lease_manager = self.lease_manager.clone();
            let host_id = self.config.host_id.clone();
            let renewal_interval = self.config.lease_renewal_interval;
            in_flight.spawn(async move {
                if let Err(error) = process_one(store, registry, lease_manager, guard, host_id, renewal_interval).await {
                    tracing::warn!(%error, "replay pass failed");
                }
            });
        }
    }
}

/// One lease-held replay pass end to end (§4.1 steps 1-6, §4.3 step 3).
///
/// An activity may run long enough to outlast the lease's TTL, so the pass
/// renews on `renewal_interval` (§5: "approximately half the lease
/// duration") while `replay::run_once` is still in flight.
async fn process_one<S: StateStore + 'static>(
    store: Arc<S>,
    registry: Arc<FunctionRegistry>,
    lease_manager: Arc<LeaseManager<S>>,
    mut guard: crate::lease::LeaseGuard<S>,
    host_id: String,
    renewal_interval: chrono::Duration,
) -> Result<(), RuntimeError> {
    let instance_id = guard.instance_id().clone();
    let now = Utc::now();

    // §4.2.3: a due timer resolves on this pass rather than waiting for a
    // separate completion event, so the executor must see it as already
    // succeeded before running the orchestrator.
    store.fire_due_timers(&instance_id, now).await?;

    let Some(record) = store.get_full_state(&instance_id, &host_id).await? else {
        return Ok(());
    };

    let work_set = run_with_lease_renewal(&lease_manager, &mut guard, renewal_interval, replay::run_once(&registry, &record, now)).await;
    let completion = work_set.completion.clone();
    let version = guard.version();

    // §4.2.1/4.2.2: a scheduled activity or sub-orchestrator is its own
    // pollable instance, not just a row in the parent's history. Captured
    // before the work set moves into `apply_work_set`.
    let spawned: Vec<InstanceRecord> = work_set
        .new_history_entries
        .iter()
        .filter(|entry| matches!(entry.kind, HistoryKind::Activity | HistoryKind::SubOrchestrator) && entry.status == HistoryStatus::Scheduled)
        .filter_map(|entry| {
            let function_name = entry.function_name.clone()?;
            let input = entry.input.clone()?;
            Some(InstanceRecord::new(entry.child_instance_id.clone(), function_name, input, Some(instance_id.clone()), now))
        })
        .collect();

    store.apply_work_set(&instance_id, version, work_set, now).await?;

    for child in spawned {
        if let Err(error) = store.save_state(child, None).await {
            tracing::warn!(%error, %instance_id, "failed to create child instance record");
        }
    }

    // §4.3 step 5: a completed instance with a parent wakes that parent by
    // resolving its matching history entry. Bounded retries cover the rare
    // version conflict with a concurrent mutation of the parent; the child
    // is already durably completed, so retrying is idempotent.
    if let (Some(completion), Some(parent_id)) = (completion, &record.parent_instance_id) {
        for _ in 0..5 {
            match store.resolve_child(parent_id, &instance_id, completion.clone(), now).await {
                Ok(true) => break,
                Ok(false) => continue,
                Err(error) => {
                    tracing::warn!(%error, %parent_id, "failed to wake parent after child completion");
                    break;
                }
            }
        }
    }

    // §4.3 step 6: the lease is released every cycle regardless of
    // whether the instance suspended or completed; the next cycle reclaims
    // it once `execute_after` is reached again.
    match guard.release().await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(%instance_id, "lease release found no matching lease to release"),
        Err(error) => tracing::warn!(%error, %instance_id, "failed to release lease"),
    }
    Ok(())
}

/// Drives `fut` to completion, renewing `guard` on `renewal_interval` ticks
/// in the meantime. A renewal failure is logged and otherwise ignored: if
/// the lease was genuinely lost, `apply_work_set`'s version CAS rejects the
/// stale commit downstream.
async fn run_with_lease_renewal<S, F>(
    lease_manager: &LeaseManager<S>,
    guard: &mut crate::lease::LeaseGuard<S>,
    renewal_interval: chrono::Duration,
    fut: F,
) -> tether_journal::WorkSet
where
    S: StateStore + 'static,
    F: std::future::Future<Output = tether_journal::WorkSet>,
{
    let mut interval = tokio::time::interval(
        renewal_interval
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(30)),
    );
    interval.tick().await;

    tokio::pin!(fut);
    loop {
        tokio::select! {
            work_set = &mut fut => return work_set,
            _ = interval.tick() => {
                if let Err(error) = lease_manager.renew(guard).await {
                    tracing::warn!(%error, instance_id = %guard.instance_id(), "lease renewal failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::{Codec, ErrorKind, ExecutionError, InstanceId, InstanceRecord, Payload, RuntimeStatus};

    use crate::client::{Client, StatusQuery};
    use crate::context::{OrchestrationContext, OrchestrationError};
    use crate::registry::FunctionRegistry;
    use crate::store::InMemoryStore;

    fn json_err(e: serde_json::Error) -> OrchestrationError {
        OrchestrationError::Failed(ExecutionError::new(ErrorKind::UserError, e.to_string()))
    }

    fn null_payload() -> Payload {
        Payload::json(&serde_json::Value::Null).unwrap()
    }

    /// Drives a real `Scheduler` polling loop in the background for the
    /// scenario tests below (SPEC_FULL.md §8 S1/S2/S3/S4/S6): these exercise
    /// `Client`+`Scheduler`+`InMemoryStore` together rather than calling
    /// `process_one` directly.
    async fn spawn_scheduler<S: StateStore + 'static>(scheduler: Arc<Scheduler<S>>) -> (tokio::sync::watch::Sender<bool>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = tokio::spawn(async move { scheduler.run(rx).await });
        (tx, handle)
    }

    async fn stop_scheduler(tx: tokio::sync::watch::Sender<bool>, handle: tokio::task::JoinHandle<()>) {
        tx.send(true).ok();
        handle.await.ok();
    }

    async fn wait_until_completed<S: StateStore + 'static>(client: &Client<S>, instance_id: &InstanceId, timeout: std::time::Duration) -> crate::client::InstanceStatus {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = client
                .get_status(instance_id, StatusQuery { show_history: true, show_input: true, show_output: true })
                .await
                .unwrap()
                .expect("instance exists");
            if matches!(status.runtime_status, RuntimeStatus::Completed | RuntimeStatus::Failed) {
                return status;
            }
            assert!(tokio::time::Instant::now() < deadline, "instance did not complete within the timeout");
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    fn fast_config() -> RuntimeConfig {
        RuntimeConfig::new("host-a")
            .with_polling_interval(chrono::Duration::milliseconds(5))
            .with_lease_duration(chrono::Duration::seconds(5))
    }

    /// S1: chained activities. `F1(x)="r1"`, `F2(x)="r2:"+x`, `F3(x)="r3:"+x`;
    /// the orchestrator awaits `F3(F2(F1(null)))`.
    #[tokio::test]
    async fn s1_chained_activities_complete_with_the_composed_result() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = FunctionRegistry::new();
        registry.register_activity("F1", |_input: Payload| async move { Payload::json(&"r1".to_string()).map_err(|e| ExecutionError::new(ErrorKind::UserError, e.to_string())) });
        registry.register_activity("F2", |input: Payload| async move {
            let s: String = input.as_json().map_err(|e| ExecutionError::new(ErrorKind::UserError, e.to_string()))?;
            Payload::json(&format!("r2:{s}")).map_err(|e| ExecutionError::new(ErrorKind::UserError, e.to_string()))
        });
        registry.register_activity("F3", |input: Payload| async move {
            let s: String = input.as_json().map_err(|e| ExecutionError::new(ErrorKind::UserError, e.to_string()))?;
            Payload::json(&format!("r3:{s}")).map_err(|e| ExecutionError::new(ErrorKind::UserError, e.to_string()))
        });
        registry.register_orchestrator("O", |ctx: &mut OrchestrationContext<'_>| {
            let r1 = ctx.call_async("F1", null_payload())?;
            let r1: String = r1.as_json().map_err(json_err)?;
            let r2 = ctx.call_async("F2", Payload::json(&r1).map_err(json_err)?)?;
            let r2: String = r2.as_json().map_err(json_err)?;
            let r3 = ctx.call_async("F3", Payload::json(&r2).map_err(json_err)?)?;
            Ok(r3)
        });

        let scheduler = Arc::new(Scheduler::new(store.clone(), registry, fast_config()));
        let client = Client::new(store.clone());
        let id = InstanceId::new("i1");
        client.start_new("O", null_payload(), Some(id.clone())).await.unwrap();

        let (tx, handle) = spawn_scheduler(scheduler).await;
        let status = wait_until_completed(&client, &id, std::time::Duration::from_secs(2)).await;
        stop_scheduler(tx, handle).await;

        assert_eq!(status.runtime_status, RuntimeStatus::Completed);
        let result: String = status.output.unwrap().as_json().unwrap();
        assert_eq!(result, "r3:r2:r1");

        let history = status.history.unwrap();
        assert_eq!(history.len(), 3);
        for entry in &history {
            let child = store.get_state(&entry.child_instance_id).await.unwrap().expect("child instance record exists");
            assert_eq!(child.parent_instance_id, Some(id.clone()));
        }
    }

    /// S2: fan-out/in. `F(k)=k*10`, all three calls made before the first
    /// suspension is observed, awaited together.
    #[tokio::test]
    async fn s2_fan_out_fan_in_collects_results_in_call_order() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = FunctionRegistry::new();
        registry.register_activity("F", |input: Payload| async move {
            let k: i64 = input.as_json().map_err(|e| ExecutionError::new(ErrorKind::UserError, e.to_string()))?;
            Payload::json(&(k * 10)).map_err(|e| ExecutionError::new(ErrorKind::UserError, e.to_string()))
        });
        registry.register_orchestrator("O", |ctx: &mut OrchestrationContext<'_>| {
            let a = ctx.call_async("F", Payload::json(&1i64).map_err(json_err)?);
            let b = ctx.call_async("F", Payload::json(&2i64).map_err(json_err)?);
            let c = ctx.call_async("F", Payload::json(&3i64).map_err(json_err)?);
            match (a, b, c) {
                (Ok(a), Ok(b), Ok(c)) => {
                    let a: i64 = a.as_json().map_err(json_err)?;
                    let b: i64 = b.as_json().map_err(json_err)?;
                    let c: i64 = c.as_json().map_err(json_err)?;
                    Payload::json(&vec![a, b, c]).map_err(json_err)
                }
                (Err(OrchestrationError::Failed(e)), _, _) => Err(OrchestrationError::Failed(e)),
                (_, Err(OrchestrationError::Failed(e)), _) => Err(OrchestrationError::Failed(e)),
                (_, _, Err(OrchestrationError::Failed(e))) => Err(OrchestrationError::Failed(e)),
                _ => Err(OrchestrationError::Suspend),
            }
        });

        let scheduler = Arc::new(Scheduler::new(store.clone(), registry, fast_config()));
        let client = Client::new(store.clone());
        let id = InstanceId::new("i1");
        client.start_new("O", null_payload(), Some(id.clone())).await.unwrap();

        let (tx, handle) = spawn_scheduler(scheduler).await;
        let status = wait_until_completed(&client, &id, std::time::Duration::from_secs(2)).await;
        stop_scheduler(tx, handle).await;

        assert_eq!(status.runtime_status, RuntimeStatus::Completed);
        let result: Vec<i64> = status.output.unwrap().as_json().unwrap();
        assert_eq!(result, vec![10, 20, 30]);
    }

    /// S3: a timer arms, fires, and the orchestrator resumes past it.
    #[tokio::test]
    async fn s3_timer_wakes_the_orchestrator_once_it_fires() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = FunctionRegistry::new();
        registry.register_orchestrator("O", |ctx: &mut OrchestrationContext<'_>| {
            ctx.create_timer_after(chrono::Duration::milliseconds(150))?;
            Payload::json(&"woke").map_err(json_err)
        });

        let scheduler = Arc::new(Scheduler::new(store.clone(), registry, fast_config()));
        let client = Client::new(store.clone());
        let id = InstanceId::new("i1");
        let armed_at = Utc::now();
        client.start_new("O", null_payload(), Some(id.clone())).await.unwrap();

        let (tx, handle) = spawn_scheduler(scheduler).await;
        let status = wait_until_completed(&client, &id, std::time::Duration::from_secs(2)).await;
        stop_scheduler(tx, handle).await;

        assert_eq!(status.runtime_status, RuntimeStatus::Completed);
        let result: String = status.output.unwrap().as_json().unwrap();
        assert_eq!(result, "woke");
        assert!(Utc::now() - armed_at >= chrono::Duration::milliseconds(150));
        let history = status.history.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, tether_types::HistoryStatus::Succeeded);
    }

    /// S4: `WaitForEvent("E")` awaited twice; one payload queued ahead of
    /// the first replay pass, the other raised afterward. FIFO order must
    /// hold across both.
    #[tokio::test]
    async fn s4_external_events_are_delivered_fifo_across_two_waits() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = FunctionRegistry::new();
        registry.register_orchestrator("O", |ctx: &mut OrchestrationContext<'_>| {
            let a = ctx.wait_for_event("E")?;
            let b = ctx.wait_for_event("E")?;
            let a: String = a.as_json().map_err(json_err)?;
            let b: String = b.as_json().map_err(json_err)?;
            Payload::json(&(a, b)).map_err(json_err)
        });

        let scheduler = Arc::new(Scheduler::new(store.clone(), registry, fast_config()));
        let client = Client::new(store.clone());
        let id = InstanceId::new("i2");
        client.start_new("O", null_payload(), Some(id.clone())).await.unwrap();
        client.raise_event(&id, "E", Payload::json(&"a".to_string()).unwrap()).await.unwrap();

        let (tx, handle) = spawn_scheduler(scheduler).await;
        // Give the scheduler time to consume the queued "a" and register a
        // waiter for the second `wait_for_event` before raising "b".
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        client.raise_event(&id, "E", Payload::json(&"b".to_string()).unwrap()).await.unwrap();

        let status = wait_until_completed(&client, &id, std::time::Duration::from_secs(2)).await;
        stop_scheduler(tx, handle).await;

        assert_eq!(status.runtime_status, RuntimeStatus::Completed);
        let (a, b): (String, String) = status.output.unwrap().as_json().unwrap();
        assert_eq!((a.as_str(), b.as_str()), ("a", "b"));
    }

    /// S6: `Terminate` while an instance is suspended awaiting an event
    /// that never arrives; a later `RaiseEvent` is a no-op.
    #[tokio::test]
    async fn s6_terminate_while_waiting_then_a_late_event_is_a_no_op() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = FunctionRegistry::new();
        registry.register_orchestrator("Forever", |ctx: &mut OrchestrationContext<'_>| {
            ctx.wait_for_event("NeverFires")?;
            Payload::json(&"done").map_err(json_err)
        });

        let scheduler = Arc::new(Scheduler::new(store.clone(), registry, fast_config()));
        let client = Client::new(store.clone());
        let id = InstanceId::new("i3");
        client.start_new("Forever", null_payload(), Some(id.clone())).await.unwrap();

        let (tx, handle) = spawn_scheduler(scheduler).await;
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        client.terminate(&id, "user").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        stop_scheduler(tx, handle).await;

        let status = client.get_status(&id, StatusQuery::default()).await.unwrap().unwrap();
        assert_eq!(status.runtime_status, RuntimeStatus::Terminated);
        let before = store.get_state(&id).await.unwrap().unwrap();

        client.raise_event(&id, "NeverFires", Payload::json(&"ignored".to_string()).unwrap()).await.unwrap();
        let after = store.get_state(&id).await.unwrap().unwrap();
        assert_eq!(before.version, after.version, "raising an event against a terminated instance must not mutate it");

        let status = client.get_status(&id, StatusQuery::default()).await.unwrap().unwrap();
        assert_eq!(status.runtime_status, RuntimeStatus::Terminated);
    }

    /// Regression for a terminated parent racing a late child completion
    /// (P10/I1): `resolve_child` must not mutate history/version once
    /// `is_completed=true`, even though the child itself completed normally.
    #[tokio::test]
    async fn terminating_a_parent_does_not_let_a_late_child_completion_mutate_it() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = FunctionRegistry::new();
        registry.register_activity("slow", |input: Payload| async move {
            tokio::time::sleep(std::time::Duration::from_millis(120)).await;
            Ok(input)
        });
        registry.register_orchestrator("O", |ctx: &mut OrchestrationContext<'_>| ctx.call_async("slow", null_payload()));

        let scheduler = Arc::new(Scheduler::new(store.clone(), registry, fast_config()));
        let client = Client::new(store.clone());
        let id = InstanceId::new("i1");
        client.start_new("O", null_payload(), Some(id.clone())).await.unwrap();

        let (tx, handle) = spawn_scheduler(scheduler).await;
        // Let the orchestrator's first pass schedule the child activity,
        // then terminate the parent while the activity is still sleeping.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        client.terminate(&id, "user").await.unwrap();
        let terminated = store.get_state(&id).await.unwrap().unwrap();
        assert!(terminated.is_completed);

        // Let the activity finish and `resolve_child` run against the
        // now-terminated parent.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        stop_scheduler(tx, handle).await;

        let after = store.get_state(&id).await.unwrap().unwrap();
        assert_eq!(after.version, terminated.version, "a late child completion must not mutate a terminated parent");
        assert_eq!(after.history, terminated.history);
        assert!(after.completed_error.is_some());
    }

    #[tokio::test]
    async fn a_slow_activity_keeps_its_lease_renewed_against_a_second_host() {
        let store = Arc::new(InMemoryStore::new());
        let mut registry = FunctionRegistry::new();
        registry.register_activity("slow", |input: Payload| async move {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            Ok(input)
        });

        let record = InstanceRecord::new(InstanceId::new("i1"), "slow", Payload::new(vec![], Codec::Json), None, Utc::now());
        store.save_state(record, None).await.unwrap();

        let lease_duration = chrono::Duration::milliseconds(80);
        let renewal_interval = chrono::Duration::milliseconds(30);
        let host_a = Arc::new(LeaseManager::new(store.clone(), "host-a", lease_duration));
        let guard = host_a.try_claim(&InstanceId::new("i1")).await.unwrap().expect("host-a claims first");

        let task = tokio::spawn(process_one(
            store.clone(),
            Arc::new(registry),
            host_a.clone(),
            guard,
            "host-a".to_string(),
            renewal_interval,
        ));

        // Past the original lease_duration, but the activity is still
        // running: renewal should have kept the lease alive against host-b.
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let host_b = LeaseManager::new(store.clone(), "host-b", lease_duration);
        let stolen = host_b.try_claim(&InstanceId::new("i1")).await.unwrap();
        assert!(stolen.is_none(), "host-b should not be able to claim a lease host-a is still renewing");

        task.await.unwrap().unwrap();

        let record = store.get_state(&InstanceId::new("i1")).await.unwrap().unwrap();
        assert!(record.is_completed);
        assert!(record.lease_owner.is_none());
    }
}
