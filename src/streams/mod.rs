//! Stream ingestion for wristband recordings.
//!
//! This module turns raw per-session device exports into merged,
//! time-ordered stream tables and reads those tables back.

pub mod io;
pub mod merge;
pub mod reconstruct;
pub mod types;

// Re-export commonly used types
pub use io::{read_raw_session, read_stream_table, write_stream_table, StudyLayout, MERGE_DIR};
pub use merge::{merge_sessions, StreamMerger};
pub use reconstruct::{reconstruct, RawSession};
pub use types::{
    axis_values, scalar_values, ReconstructionMode, SampleValue, StreamError, StreamKind,
    StreamTable, TimedSample,
};
