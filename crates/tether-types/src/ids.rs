use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The primary key of an instance record: an orchestrator or activity
/// invocation. Root instances are caller-chosen or randomly generated;
/// child instances are derived deterministically, see [`derive_child_id`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh, unpredictable id for a root instance whose caller did not
    /// supply one via `StartNew`.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The discriminant mixed into a child id's hash input, identifying which
/// kind of call site produced it. `Timer` carries no name of its own; its
/// call sites are distinguished purely by the per-parent ordinal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallSite<'a> {
    Activity(&'a str),
    SubOrchestrator(&'a str),
    Timer,
    ExternalEvent(&'a str),
}

impl CallSite<'_> {
    fn tag(&self) -> &'static [u8] {
        match self {
            CallSite::Activity(_) => b"activity",
            CallSite::SubOrchestrator(_) => b"sub_orchestrator",
            CallSite::Timer => b"timer",
            CallSite::ExternalEvent(_) => b"external_event",
        }
    }

    fn name(&self) -> &str {
        match self {
            CallSite::Activity(name) => name,
            CallSite::SubOrchestrator(name) => name,
            CallSite::Timer => "",
            CallSite::ExternalEvent(name) => name,
        }
    }
}

/// Derive a child instance id per §3.4: a collision-resistant hash over the
/// parent id, the call-site discriminant (function/event name or the fixed
/// timer tag), and either the serialized input or a per-parent ordinal.
///
/// Every variable-length field is length-prefixed before hashing so that,
/// e.g., concatenating `("ab", "c")` can never collide with `("a", "bc")`.
pub fn derive_child_id(parent: &InstanceId, site: CallSite<'_>, ordinal: u32, key_material: &[u8]) -> InstanceId {
    let mut hasher = Sha256::new();

    let parent_bytes = parent.as_str().as_bytes();
    hasher.update((parent_bytes.len() as u32).to_le_bytes());
    hasher.update(parent_bytes);

    hasher.update((site.tag().len() as u32).to_le_bytes());
    hasher.update(site.tag());

    let name_bytes = site.name().as_bytes();
    hasher.update((name_bytes.len() as u32).to_le_bytes());
    hasher.update(name_bytes);

    hasher.update(ordinal.to_le_bytes());

    hasher.update((key_material.len() as u32).to_le_bytes());
    hasher.update(key_material);

    let hash: [u8; 32] = hasher.finalize().into();
    InstanceId(hex::encode(hash))
}
