use thiserror;

/// Errors raised synchronously by operations that do not yet have (or no
/// longer have) an instance record to attach a structured failure to.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DomainError {
    /// No orchestrator or activity is registered under this name. Surfaced
    /// synchronously from `StartNew` per §7; the replay-time equivalent is
    /// `ErrorKind::Registration` on a completed-failed instance.
    #[error("no function registered under name {function_name:?}")]
    UnknownFunction { function_name: String },

    /// `StartNew` / `RaiseEvent` payload exceeded `max_input_size` (§6.3).
    #[error("payload of {actual} bytes exceeds max_input_size of {limit} bytes")]
    InputTooLarge { limit: usize, actual: usize },
}
