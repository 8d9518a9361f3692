pub mod error;
pub mod execution_error;
pub mod history;
pub mod ids;
pub mod instance;
pub mod payload;

pub use error::DomainError;
pub use execution_error::{ErrorKind, ExecutionError};
pub use history::{AwaitedEventRecord, HistoryEntry, HistoryKind, HistoryStatus};
pub use ids::{CallSite, InstanceId, derive_child_id};
pub use instance::{InstanceProjection, InstanceRecord, RuntimeStatus};
pub use payload::{Codec, Payload};
