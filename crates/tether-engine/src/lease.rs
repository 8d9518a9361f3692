//! Lease coordination (§4.4): atomic claim/renew/release over state-store
//! rows, with TTL-based failover when a host dies mid-lease.
//!
//! `LeaseGuard` mirrors the RAII scope-guard pattern the pack's worker-pool
//! examples use for in-flight work: it disarms on a clean release and
//! otherwise fires a best-effort release when dropped, so a panicking
//! replay pass does not hold a lease until its TTL expires.

use std::sync::Arc;

use chrono::Utc;
use tether_types::InstanceId;

use crate::error::RuntimeError;
use crate::store::StateStore;

pub struct LeaseManager<S: StateStore> {
    store: Arc<S>,
    host_id: String,
    lease_duration: chrono::Duration,
}

impl<S: StateStore + 'static> LeaseManager<S> {
    pub fn new(store: Arc<S>, host_id: impl Into<String>, lease_duration: chrono::Duration) -> Self {
        Self {
            store,
            host_id: host_id.into(),
            lease_duration,
        }
    }

    pub async fn try_claim(&self, instance_id: &InstanceId) -> Result<Option<LeaseGuard<S>>, RuntimeError> {
        let result = self
            .store
            .try_claim_lease(instance_id, &self.host_id, self.lease_duration, Utc::now())
            .await?;
        if !result.success {
            return Ok(None);
        }
        Ok(Some(LeaseGuard {
            store: self.store.clone(),
            instance_id: instance_id.clone(),
            host_id: self.host_id.clone(),
            version: result.new_version,
            armed: true,
        }))
    }

    pub async fn renew(&self, guard: &mut LeaseGuard<S>) -> Result<bool, RuntimeError> {
        let renewed = self
            .store
            .renew_lease(&guard.instance_id, &guard.host_id, self.lease_duration, guard.version, Utc::now())
            .await?;
        if renewed {
            guard.version += 1;
        }
        Ok(renewed)
    }
}

/// Holds a claimed lease for exactly as long as this guard is alive.
/// `release` consumes it cleanly; an unreleased guard still attempts a
/// best-effort release on drop, spawned onto the current Tokio runtime
/// since `Drop` cannot be `async`.
pub struct LeaseGuard<S: StateStore> {
    store: Arc<S>,
    instance_id: InstanceId,
    host_id: String,
    version: u64,
    armed: bool,
}

impl<S: StateStore> LeaseGuard<S> {
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Disarm the guard and release the lease cleanly.
    pub async fn release(mut self) -> Result<bool, RuntimeError> {
        self.armed = false;
        self.store.release_lease(&self.instance_id, &self.host_id, self.version).await
    }
}

impl<S: StateStore + 'static> Drop for LeaseGuard<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let instance_id = self.instance_id.clone();
        let host_id = std::mem::take(&mut self.host_id);
        let version = self.version;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) = store.release_lease(&instance_id, &host_id, version).await {
                    tracing::warn!(%instance_id, %error, "best-effort lease release on drop failed");
                }
            });
        }
    }
}
