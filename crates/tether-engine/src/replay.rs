//! The replay executor (§4.1): runs one pass of an instance's function
//! against its existing history and produces a `WorkSet`.

use chrono::{DateTime, Utc};
use tether_journal::{Completion, HistoryIndex, WorkSet};
use tether_types::{DomainError, ExecutionError, ErrorKind, InstanceRecord, Payload};

use crate::context::{OrchestrationContext, OrchestrationError};
use crate::registry::FunctionRegistry;

/// Runs exactly one replay pass for `record` against `registry`, at the
/// frozen instant `now` (§4.2.5). Never mutates `record`; the caller
/// commits the returned work set via `StateStore::apply_work_set`.
pub async fn run_once(registry: &FunctionRegistry, record: &InstanceRecord, now: DateTime<Utc>) -> WorkSet {
    if let Some(activity) = registry.activity(&record.function_name) {
        return run_activity(activity.as_ref(), record.input.clone()).await;
    }

    if let Some(orchestrator) = registry.orchestrator(&record.function_name) {
        return run_orchestrator(orchestrator.as_ref(), record, now);
    }

    let mut work_set = WorkSet::new();
    let error = ExecutionError::new(
        ErrorKind::Registration,
        DomainError::UnknownFunction {
            function_name: record.function_name.clone(),
        }
        .to_string(),
    );
    work_set.complete(Completion::Failed(error));
    work_set
}

async fn run_activity(activity: &dyn crate::registry::Activity, input: Payload) -> WorkSet {
    let mut work_set = WorkSet::new();
    match activity.call(input).await {
        Ok(payload) => work_set.complete(Completion::Succeeded(payload)),
        Err(error) => work_set.complete(Completion::Failed(error)),
    }
    work_set
}

fn run_orchestrator(orchestrator: &dyn crate::registry::Orchestrator, record: &InstanceRecord, now: DateTime<Utc>) -> WorkSet {
    let history_index = HistoryIndex::build(&record.history);
    let queue_peek = |name: &str, offset: usize| -> Option<Payload> { record.event_queues.get(name)?.get(offset).cloned() };

    let mut ctx = OrchestrationContext::new(
        record.instance_id.clone(),
        record.parent_instance_id.clone(),
        record.function_name.clone(),
        record.input.clone(),
        history_index,
        queue_peek,
        now,
    );

    let outcome = orchestrator.run(&mut ctx);
    let mut work_set = ctx.into_work_set();

    match outcome {
        Ok(payload) => work_set.complete(Completion::Succeeded(payload)),
        Err(OrchestrationError::Suspend) => {}
        Err(OrchestrationError::Failed(error)) => work_set.complete(Completion::Failed(error)),
    }

    work_set
}
