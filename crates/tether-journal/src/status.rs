//! Derive the client-facing `RuntimeStatus` (§6.2) from an instance
//! record. The status is never stored; `GetStatus` (§4.6) derives it on
//! every read from `is_completed`, `completed_error`, and whether the
//! instance has ever been picked up.

use tether_types::{ErrorKind, InstanceRecord, RuntimeStatus};

/// Derive the runtime status surfaced to clients from {completed_ok,
/// completed_failed, running, terminated, pending} (§4.6).
pub fn derive_status(record: &InstanceRecord) -> RuntimeStatus {
    if record.is_completed {
        return match &record.completed_error {
            None => RuntimeStatus::Completed,
            Some(err) if err.kind == ErrorKind::Terminated => RuntimeStatus::Terminated,
            Some(_) => RuntimeStatus::Failed,
        };
    }

    let ever_picked_up = record.lease_owner.is_some() || !record.history.is_empty() || record.version > 0;
    if ever_picked_up {
        RuntimeStatus::Running
    } else {
        RuntimeStatus::Pending
    }
}
