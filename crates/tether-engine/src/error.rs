use thiserror::Error;

use tether_types::DomainError;

/// Top-level engine error. Per §7's propagation policy, only
/// `Registration` ever reaches a caller synchronously (from `StartNew`);
/// everything else is handled inside the scheduler and never surfaced to
/// user orchestrator code.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Registration(#[from] DomainError),

    /// Surfaced to the scheduler, which backs off and retries on the next
    /// cycle (§7 storage error).
    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Journal(#[from] tether_journal::JournalError),
}
