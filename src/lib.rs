//! Wearable Features - time alignment and feature extraction for wrist-worn
//! physiological recordings.
//!
//! Raw device exports carry a start time and a sampling rate instead of
//! per-row timestamps. This library reconstructs absolute time for every
//! sample, merges the sessions of each subject, and computes per-event
//! physiology features around wake and sleep self-reports.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Wearable Features                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │ Reconstruct │──▶│    Merge    │──▶│  full_*.csv │       │
//! │  │ (per file)  │   │ (per type)  │   │   tables    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │                                              │              │
//! │  ┌─────────────┐   ┌─────────────┐          ▼              │
//! │  │   Report    │──▶│   Windows   │──▶ Spectral / EDA /     │
//! │  │   events    │   │  per event  │    summary extractors   │
//! │  └─────────────┘   └─────────────┘          │              │
//! │         │                                    ▼              │
//! │  ┌─────────────┐                     ┌─────────────┐       │
//! │  │   Run log   │                     │ Feature CSV │       │
//! │  └─────────────┘                     └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use wearable_features::{audit::RunLog, config::Config, core::*, pipeline};
//!
//! let config = Config::default();
//! let log = RunLog::new();
//! let running = AtomicBool::new(true);
//!
//! pipeline::run_merge_stage(&config, &[], &log, &running).unwrap();
//!
//! let table = ReportTable::read("wake.csv".as_ref()).unwrap();
//! let output = features_path(table.path(), &config.output_dir);
//! pipeline::run_feature_stage(&table, EventKind::Wake, &output, &config, &log, &running).unwrap();
//! ```

pub mod audit;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod streams;

// Re-export key types at crate root for convenience
pub use audit::{RunLog, RunStats, SharedRunLog};
pub use config::{Config, ConfigError};
pub use core::{compute_features, EventFeatures, EventKind, ExtractionSettings, ReportTable};
pub use pipeline::{run_feature_stage, run_merge_stage, PipelineError};
pub use streams::{StreamKind, StreamMerger, StreamTable, TimedSample};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
