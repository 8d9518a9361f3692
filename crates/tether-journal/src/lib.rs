//! Instance-record mutation and invariant-checking logic (§3, §4.1 step 3-6).
//!
//! Pure and synchronous: no I/O, no async. `tether-engine` drives the
//! replay executor and the store against the types here.

pub mod error;
pub mod history_index;
pub mod invariants;
pub mod resolution;
pub mod status;
pub mod work_set;

pub use error::{JournalError, JournalViolation};
pub use history_index::HistoryIndex;
pub use invariants::{InvariantState, check_apply, validate_instance};
pub use status::derive_status;
pub use work_set::{Completion, WorkSet};
