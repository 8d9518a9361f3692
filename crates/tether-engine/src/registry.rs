//! Function registration (§9): orchestrators and activities are both
//! looked up by `function_name` against one flat, read-only map, built
//! once before the scheduler starts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tether_types::{ExecutionError, Payload};

use crate::context::{OrchestrationContext, OrchestrationError};

/// Deterministic, synchronous orchestration logic. Implementors must make
/// no decision that isn't reproducible from `ctx` alone (§4.1, §9).
pub trait Orchestrator: Send + Sync {
    fn run(&self, ctx: &mut OrchestrationContext<'_>) -> Result<Payload, OrchestrationError>;
}

impl<F> Orchestrator for F
where
    F: Fn(&mut OrchestrationContext<'_>) -> Result<Payload, OrchestrationError> + Send + Sync,
{
    fn run(&self, ctx: &mut OrchestrationContext<'_>) -> Result<Payload, OrchestrationError> {
        self(ctx)
    }
}

/// An ordinary, possibly side-effecting handler (§9 "function_name →
/// handler map"). Activities are not replayed: each instance record runs
/// its handler at most once to completion.
#[async_trait]
pub trait Activity: Send + Sync {
    async fn call(&self, input: Payload) -> Result<Payload, ExecutionError>;
}

#[async_trait]
impl<F, Fut> Activity for F
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Payload, ExecutionError>> + Send,
{
    async fn call(&self, input: Payload) -> Result<Payload, ExecutionError> {
        self(input).await
    }
}

/// Read-only once built; cloned cheaply (`Arc`-backed) into every worker
/// task the scheduler spawns.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    orchestrators: HashMap<String, Arc<dyn Orchestrator>>,
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_orchestrator(&mut self, name: impl Into<String>, f: impl Orchestrator + 'static) -> &mut Self {
        self.orchestrators.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_activity(&mut self, name: impl Into<String>, f: impl Activity + 'static) -> &mut Self {
        self.activities.insert(name.into(), Arc::new(f));
        self
    }

    pub fn orchestrator(&self, name: &str) -> Option<Arc<dyn Orchestrator>> {
        self.orchestrators.get(name).cloned()
    }

    pub fn activity(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }

    pub fn knows(&self, name: &str) -> bool {
        self.orchestrators.contains_key(name) || self.activities.contains_key(name)
    }
}
