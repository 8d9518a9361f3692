//! The state-store contract (§4.5) and its in-memory reference backend.
//!
//! `StateStore` mirrors the host's use of `async-trait` for pluggable I/O
//! boundaries. Every mutating operation is specified as a single-row CAS;
//! `InMemoryStore` gets that for free from one `tokio::sync::RwLock` guard
//! per call instead of a real transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tether_journal::WorkSet;
use tether_types::{Codec, ExecutionError, ErrorKind, HistoryKind, HistoryStatus, InstanceId, InstanceProjection, InstanceRecord, Payload};
use tokio::sync::RwLock;

/// Outcome of `try_claim_lease`/`renew_lease` (§4.4).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeaseResult {
    pub success: bool,
    pub new_version: u64,
}

/// Durable persistence of instance records with optimistic concurrency and
/// lease columns (§4.5). Implementors must make every method here behave
/// as a single atomic operation against the backing store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Upserts. Fails with `RuntimeError::Storage` on a version mismatch
    /// when `expected_version` is given.
    async fn save_state(&self, record: InstanceRecord, expected_version: Option<u64>) -> Result<(), crate::error::RuntimeError>;

    async fn get_state(&self, instance_id: &InstanceId) -> Result<Option<InstanceRecord>, crate::error::RuntimeError>;

    /// `is_completed=false` AND `execute_after<=now` AND lease claimable.
    async fn get_ready_candidates(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<InstanceProjection>, crate::error::RuntimeError>;

    async fn try_claim_lease(
        &self,
        instance_id: &InstanceId,
        host_id: &str,
        lease_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseResult, crate::error::RuntimeError>;

    async fn renew_lease(
        &self,
        instance_id: &InstanceId,
        host_id: &str,
        lease_duration: chrono::Duration,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::error::RuntimeError>;

    async fn release_lease(&self, instance_id: &InstanceId, host_id: &str, expected_version: u64) -> Result<bool, crate::error::RuntimeError>;

    /// Caller proves lease ownership; protects against stale reads by a
    /// host that has since lost its lease.
    async fn get_full_state(&self, instance_id: &InstanceId, expected_lease_owner: &str) -> Result<Option<InstanceRecord>, crate::error::RuntimeError>;

    /// Single CAS: add history entries, update events/waiters, advance
    /// `execute_after`, optionally set `is_completed`+result (§4.3 step 4).
    /// Lease release is a separate step (§4.3 step 6), done through
    /// `LeaseGuard`/`ReleaseLease`.
    async fn apply_work_set(
        &self,
        instance_id: &InstanceId,
        expected_version: u64,
        work_set: WorkSet,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::error::RuntimeError>;

    /// Atomic: if the earliest waiter for `event_name` exists, deliver
    /// (mutate its history entry, wake the parent via `execute_after=now`);
    /// else append to `event_queues[event_name]`.
    async fn raise_event(&self, instance_id: &InstanceId, event_name: &str, payload: Payload, now: DateTime<Utc>) -> Result<(), crate::error::RuntimeError>;

    /// §4.2.3: marks every `Timer` history entry with `fire_at <= now` and
    /// still `Scheduled` as succeeded (no payload). Called once per claimed
    /// replay pass before loading the record the executor will see, so a
    /// due timer resolves synchronously on this pass instead of requiring
    /// a separate completion event the way activities do.
    async fn fire_due_timers(&self, instance_id: &InstanceId, now: DateTime<Utc>) -> Result<(), crate::error::RuntimeError>;

    /// CAS-marks completed with a termination error, regardless of lease.
    async fn terminate(&self, instance_id: &InstanceId, reason: &str, now: DateTime<Utc>) -> Result<(), crate::error::RuntimeError>;

    /// Deletes the record. Children of a purged parent are orphaned
    /// (§4.5, Open Question in DESIGN.md): caller may cascade itself.
    async fn purge(&self, instance_id: &InstanceId) -> Result<usize, crate::error::RuntimeError>;

    /// §4.3 step 5: when a child instance completes, wake its parent by
    /// resolving the parent's matching history entry and advancing
    /// `parent.execute_after = now`. A version conflict (another host
    /// raced a different mutation through the parent) is reported via the
    /// `bool` so the caller can retry with a fresh read; the child is
    /// already completed, so retrying is idempotent.
    async fn resolve_child(
        &self,
        parent_instance_id: &InstanceId,
        child_instance_id: &InstanceId,
        outcome: tether_journal::Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::error::RuntimeError>;
}

/// Reference backend (§4.5 Non-goals: no SQL implementation is in scope).
/// Grounded on the shared-state-behind-a-lock shape used for the in-memory
/// scheduler state in the pack's worker-pool examples.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<InstanceId, InstanceRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn save_state(&self, record: InstanceRecord, expected_version: Option<u64>) -> Result<(), crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        if let Some(expected) = expected_version {
            if let Some(existing) = records.get(&record.instance_id) {
                if existing.version != expected {
                    return Err(crate::error::RuntimeError::Storage(format!(
                        "version conflict on {}: expected {expected}, found {}",
                        record.instance_id, existing.version
                    )));
                }
            }
        }
        records.insert(record.instance_id.clone(), record);
        Ok(())
    }

    async fn get_state(&self, instance_id: &InstanceId) -> Result<Option<InstanceRecord>, crate::error::RuntimeError> {
        Ok(self.records.read().await.get(instance_id).cloned())
    }

    async fn get_ready_candidates(&self, now: DateTime<Utc>, max: usize) -> Result<Vec<InstanceProjection>, crate::error::RuntimeError> {
        let records = self.records.read().await;
        let mut candidates: Vec<InstanceProjection> = records
            .values()
            .filter(|r| r.is_claimable(now))
            .map(InstanceProjection::from)
            .collect();
        candidates.sort_by(|a, b| a.execute_after.cmp(&b.execute_after));
        candidates.truncate(max);
        Ok(candidates)
    }

    async fn try_claim_lease(
        &self,
        instance_id: &InstanceId,
        host_id: &str,
        lease_duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<LeaseResult, crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(instance_id) else {
            return Ok(LeaseResult { success: false, new_version: 0 });
        };
        if !record.is_claimable(now) {
            return Ok(LeaseResult {
                success: false,
                new_version: record.version,
            });
        }
        record.lease_owner = Some(host_id.to_string());
        record.lease_expires_at = Some(now + lease_duration);
        record.version += 1;
        record.updated_at = now;
        Ok(LeaseResult {
            success: true,
            new_version: record.version,
        })
    }

    async fn renew_lease(
        &self,
        instance_id: &InstanceId,
        host_id: &str,
        lease_duration: chrono::Duration,
        expected_version: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(instance_id) else {
            return Ok(false);
        };
        if record.version != expected_version || record.lease_owner.as_deref() != Some(host_id) {
            return Ok(false);
        }
        record.lease_expires_at = Some(now + lease_duration);
        record.version += 1;
        record.updated_at = now;
        Ok(true)
    }

    async fn release_lease(&self, instance_id: &InstanceId, host_id: &str, expected_version: u64) -> Result<bool, crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(instance_id) else {
            return Ok(false);
        };
        if record.version != expected_version || record.lease_owner.as_deref() != Some(host_id) {
            return Ok(false);
        }
        record.lease_owner = None;
        record.lease_expires_at = None;
        record.version += 1;
        Ok(true)
    }

    async fn get_full_state(&self, instance_id: &InstanceId, expected_lease_owner: &str) -> Result<Option<InstanceRecord>, crate::error::RuntimeError> {
        let records = self.records.read().await;
        Ok(records.get(instance_id).and_then(|r| {
            if r.lease_owner.as_deref() == Some(expected_lease_owner) {
                Some(r.clone())
            } else {
                None
            }
        }))
    }

    async fn apply_work_set(
        &self,
        instance_id: &InstanceId,
        expected_version: u64,
        work_set: WorkSet,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(instance_id) else {
            return Ok(false);
        };
        if record.version != expected_version {
            return Ok(false);
        }

        let state = tether_journal::InvariantState::from_record(record);
        tether_journal::check_apply(&state, &work_set)?;

        for name in &work_set.queue_consumptions {
            if let Some(queue) = record.event_queues.get_mut(name) {
                queue.pop_front();
            }
        }
        record.history.extend(work_set.new_history_entries);
        record.awaited_events.extend(work_set.new_waiters);
        if let Some(execute_after) = work_set.execute_after {
            if execute_after < record.execute_after {
                record.execute_after = execute_after;
            }
        }
        if let Some(completion) = work_set.completion {
            record.is_completed = true;
            match completion {
                tether_journal::Completion::Succeeded(payload) => record.completed_result = Some(payload),
                tether_journal::Completion::Failed(error) => record.completed_error = Some(error),
            }
        }
        record.version += 1;
        record.updated_at = now;
        Ok(true)
    }

    async fn raise_event(&self, instance_id: &InstanceId, event_name: &str, payload: Payload, now: DateTime<Utc>) -> Result<(), crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(instance_id) else {
            return Ok(());
        };
        if record.is_completed {
            return Ok(());
        }

        if let Some(waiter) = tether_journal::resolution::take_earliest_waiter(&mut record.awaited_events, event_name) {
            if let Some(entry) = record.history_entry_mut(&waiter.slot_id) {
                entry.succeed(payload, now);
            }
            record.execute_after = now;
        } else {
            record.event_queues.entry(event_name.to_string()).or_default().push_back(payload);
        }
        record.version += 1;
        record.updated_at = now;
        Ok(())
    }

    async fn fire_due_timers(&self, instance_id: &InstanceId, now: DateTime<Utc>) -> Result<(), crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(instance_id) else {
            return Ok(());
        };
        let mut fired = false;
        for entry in record.history.iter_mut() {
            if entry.kind == HistoryKind::Timer && entry.status == HistoryStatus::Scheduled && entry.fire_at.is_some_and(|fire_at| fire_at <= now) {
                entry.succeed(Payload::new(Vec::new(), Codec::Json), now);
                fired = true;
            }
        }
        if fired {
            record.version += 1;
            record.updated_at = now;
        }
        Ok(())
    }

    async fn terminate(&self, instance_id: &InstanceId, reason: &str, now: DateTime<Utc>) -> Result<(), crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(instance_id) else {
            return Ok(());
        };
        if record.is_completed {
            return Ok(());
        }
        record.is_completed = true;
        record.completed_error = Some(ExecutionError::new(ErrorKind::Terminated, reason.to_string()));
        record.lease_owner = None;
        record.lease_expires_at = None;
        record.version += 1;
        record.updated_at = now;
        Ok(())
    }

    async fn purge(&self, instance_id: &InstanceId) -> Result<usize, crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        Ok(if records.remove(instance_id).is_some() { 1 } else { 0 })
    }

    async fn resolve_child(
        &self,
        parent_instance_id: &InstanceId,
        child_instance_id: &InstanceId,
        outcome: tether_journal::Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::error::RuntimeError> {
        let mut records = self.records.write().await;
        let Some(parent) = records.get_mut(parent_instance_id) else {
            return Ok(false);
        };
        // I1/P10: a terminated or already-completed parent accepts no
        // further mutation, not even a child wake-up that raced the
        // termination.
        if parent.is_completed {
            return Ok(true);
        }
        let Some(entry) = parent.history_entry_mut(child_instance_id) else {
            return Ok(false);
        };

        let result = match outcome {
            tether_journal::Completion::Succeeded(payload) => tether_journal::resolution::try_succeed(entry, payload, now),
            tether_journal::Completion::Failed(error) => tether_journal::resolution::try_fail(entry, error, now),
        };
        match result {
            Ok(()) => {}
            // Already resolved (e.g. a retried call after a version
            // conflict): idempotent, not an error.
            Err(tether_journal::JournalViolation::HistoryEntryRegressed { .. }) => return Ok(true),
            Err(violation) => return Err(crate::error::RuntimeError::from(tether_journal::JournalError::from(violation))),
        }

        parent.execute_after = now;
        parent.version += 1;
        parent.updated_at = now;
        Ok(true)
    }
}
