//! Durable orchestration runtime (§4): replay-based execution of
//! orchestrator and activity instances, lease-coordinated across hosts.

mod client;
mod config;
mod context;
mod error;
mod lease;
mod registry;
mod replay;
mod scheduler;
mod store;

pub use client::{Client, InstanceStatus, StatusQuery};
pub use config::{DEFAULT_MAX_INPUT_SIZE, RuntimeConfig};
pub use context::{OrchestrationContext, OrchestrationError};
pub use error::RuntimeError;
pub use lease::{LeaseGuard, LeaseManager};
pub use registry::{Activity, FunctionRegistry, Orchestrator};
pub use replay::run_once;
pub use scheduler::Scheduler;
pub use store::{InMemoryStore, StateStore};
