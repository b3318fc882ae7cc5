//! Run accounting for the batch pipeline.
//!
//! Counts what a run did (subjects, merged streams, events, gated and
//! failed extractions) so a run can be checked after the fact.

pub mod log;

// Re-export commonly used types
pub use log::{create_shared_log, RunLog, RunStats, SharedRunLog};
