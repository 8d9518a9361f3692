//! The client API (§4.6): `StartNew`, `GetStatus`, `RaiseEvent`,
//! `Terminate`, `PurgeInstanceHistory`, used by external callers and
//! management surfaces.

use std::sync::Arc;

use chrono::Utc;
use tether_journal::derive_status;
use tether_types::{DomainError, HistoryEntry, InstanceId, InstanceRecord, Payload, RuntimeStatus};

use crate::error::RuntimeError;
use crate::store::StateStore;

/// The full or partial view `GetStatus` returns, shaped by the caller's
/// `show_history`/`show_input`/`show_output` flags (§4.6, §6.2).
#[derive(Clone, Debug)]
pub struct InstanceStatus {
    pub instance_id: InstanceId,
    pub runtime_status: RuntimeStatus,
    pub input: Option<Payload>,
    pub output: Option<Payload>,
    pub history: Option<Vec<HistoryEntry>>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StatusQuery {
    pub show_history: bool,
    pub show_input: bool,
    pub show_output: bool,
}

/// A small, cheaply cloned facade over a shared store handle (§4.6
/// `[AMBIENT]`): no state of its own beyond the `Arc` it holds and the
/// `max_input_size` limit it enforces on the caller's behalf (§6.3).
pub struct Client<S: StateStore> {
    store: Arc<S>,
    max_input_size: usize,
}

impl<S: StateStore> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            max_input_size: self.max_input_size,
        }
    }
}

impl<S: StateStore> Client<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_max_input_size(store, crate::config::DEFAULT_MAX_INPUT_SIZE)
    }

    pub fn with_max_input_size(store: Arc<S>, max_input_size: usize) -> Self {
        Self { store, max_input_size }
    }

    fn check_payload_size(&self, payload: &Payload) -> Result<(), RuntimeError> {
        if payload.len() > self.max_input_size {
            return Err(RuntimeError::Registration(DomainError::InputTooLarge {
                limit: self.max_input_size,
                actual: payload.len(),
            }));
        }
        Ok(())
    }

    /// Writes a fresh instance record; the scheduler picks it up on the
    /// next cycle. If `instance_id` is omitted, one is generated.
    pub async fn start_new(&self, function_name: impl Into<String>, input: Payload, instance_id: Option<InstanceId>) -> Result<InstanceId, RuntimeError> {
        self.check_payload_size(&input)?;
        let instance_id = instance_id.unwrap_or_else(InstanceId::generate);
        let record = InstanceRecord::new(instance_id.clone(), function_name, input, None, Utc::now());
        self.store.save_state(record, None).await?;
        Ok(instance_id)
    }

    pub async fn get_status(&self, instance_id: &InstanceId, query: StatusQuery) -> Result<Option<InstanceStatus>, RuntimeError> {
        let Some(record) = self.store.get_state(instance_id).await? else {
            return Ok(None);
        };
        let runtime_status = derive_status(&record);
        Ok(Some(InstanceStatus {
            instance_id: record.instance_id.clone(),
            runtime_status,
            input: query.show_input.then(|| record.input.clone()),
            output: query.show_output.then(|| record.completed_result.clone()).flatten(),
            history: query.show_history.then(|| record.history.clone()),
        }))
    }

    /// Delegates to the store's atomic deliver-or-enqueue (§4.2.4, §4.5).
    pub async fn raise_event(&self, instance_id: &InstanceId, event_name: &str, payload: Payload) -> Result<(), RuntimeError> {
        self.check_payload_size(&payload)?;
        self.store.raise_event(instance_id, event_name, payload, Utc::now()).await
    }

    pub async fn terminate(&self, instance_id: &InstanceId, reason: &str) -> Result<(), RuntimeError> {
        self.store.terminate(instance_id, reason, Utc::now()).await
    }

    pub async fn purge_instance_history(&self, instance_id: &InstanceId) -> Result<usize, RuntimeError> {
        self.store.purge(instance_id).await
    }

    /// Convenience beyond §4.6's literal operation set (DESIGN.md Open
    /// Question decision): purges an instance and every descendant found
    /// in its own history tree, best-effort, skipping instances already
    /// gone.
    pub async fn purge_recursive(&self, instance_id: &InstanceId) -> Result<usize, RuntimeError> {
        let mut total = 0;
        let mut frontier = vec![instance_id.clone()];
        while let Some(current) = frontier.pop() {
            if let Some(record) = self.store.get_state(&current).await? {
                frontier.extend(record.history.iter().map(|e| e.child_instance_id.clone()));
            }
            total += self.store.purge(&current).await?;
        }
        Ok(total)
    }
}
