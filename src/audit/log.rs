//! Run statistics log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters for one pipeline run.
#[derive(Debug)]
pub struct RunLog {
    run_id: Uuid,
    /// Subjects whose events were processed
    subjects_processed: AtomicU64,
    /// Subjects skipped (no recording, or stopped early)
    subjects_skipped: AtomicU64,
    /// Merged stream tables written
    streams_merged: AtomicU64,
    /// Samples across all merged tables
    samples_merged: AtomicU64,
    /// Session files rejected for malformed headers or rows
    malformed_inputs: AtomicU64,
    /// Report events processed
    events_processed: AtomicU64,
    /// Extractors skipped by a gate
    gated_extractions: AtomicU64,
    /// Extractors whose algorithm failed
    failed_decompositions: AtomicU64,
    /// Feature tables written
    tables_written: AtomicU64,
    run_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl RunLog {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            subjects_processed: AtomicU64::new(0),
            subjects_skipped: AtomicU64::new(0),
            streams_merged: AtomicU64::new(0),
            samples_merged: AtomicU64::new(0),
            malformed_inputs: AtomicU64::new(0),
            events_processed: AtomicU64::new(0),
            gated_extractions: AtomicU64::new(0),
            failed_decompositions: AtomicU64::new(0),
            tables_written: AtomicU64::new(0),
            run_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a run log that [`save`](Self::save)s to `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);
        log
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_subject_processed(&self) {
        self.subjects_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_subject_skipped(&self) {
        self.subjects_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a merged table of `samples` rows.
    pub fn record_stream_merged(&self, samples: u64) {
        self.streams_merged.fetch_add(1, Ordering::Relaxed);
        self.samples_merged.fetch_add(samples, Ordering::Relaxed);
    }

    pub fn record_malformed_input(&self) {
        self.malformed_inputs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gated_extraction(&self) {
        self.gated_extractions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_decomposition(&self) {
        self.failed_decompositions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_table_written(&self) {
        self.tables_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> RunStats {
        RunStats {
            run_id: self.run_id,
            subjects_processed: self.subjects_processed.load(Ordering::Relaxed),
            subjects_skipped: self.subjects_skipped.load(Ordering::Relaxed),
            streams_merged: self.streams_merged.load(Ordering::Relaxed),
            samples_merged: self.samples_merged.load(Ordering::Relaxed),
            malformed_inputs: self.malformed_inputs.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            gated_extractions: self.gated_extractions.load(Ordering::Relaxed),
            failed_decompositions: self.failed_decompositions.load(Ordering::Relaxed),
            tables_written: self.tables_written.load(Ordering::Relaxed),
            run_start: self.run_start,
            run_duration_secs: (Utc::now() - self.run_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        self.stats().summary()
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let json = serde_json::to_string_pretty(&self.stats()).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }
}

impl Default for RunLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of run statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub subjects_processed: u64,
    pub subjects_skipped: u64,
    pub streams_merged: u64,
    pub samples_merged: u64,
    pub malformed_inputs: u64,
    pub events_processed: u64,
    pub gated_extractions: u64,
    pub failed_decompositions: u64,
    pub tables_written: u64,
    pub run_start: DateTime<Utc>,
    pub run_duration_secs: u64,
}

impl RunStats {
    /// Read stats saved by a previous run, if any.
    pub fn load(path: &Path) -> Result<Option<Self>, std::io::Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(std::io::Error::other)
    }

    pub fn summary(&self) -> String {
        format!(
            "Run {} (started {}, {} seconds):\n\
             - Subjects processed: {}\n\
             - Subjects skipped: {}\n\
             - Streams merged: {} ({} samples)\n\
             - Malformed inputs: {}\n\
             - Events processed: {}\n\
             - Gated extractions: {}\n\
             - Failed decompositions: {}\n\
             - Feature tables written: {}",
            self.run_id,
            self.run_start.format("%Y-%m-%d %H:%M:%S UTC"),
            self.run_duration_secs,
            self.subjects_processed,
            self.subjects_skipped,
            self.streams_merged,
            self.samples_merged,
            self.malformed_inputs,
            self.events_processed,
            self.gated_extractions,
            self.failed_decompositions,
            self.tables_written
        )
    }
}

/// Run log shared between the pipeline and the binary.
pub type SharedRunLog = Arc<RunLog>;

pub fn create_shared_log(persist_path: Option<PathBuf>) -> SharedRunLog {
    Arc::new(match persist_path {
        Some(path) => RunLog::with_persistence(path),
        None => RunLog::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_log_counting() {
        let log = RunLog::new();

        log.record_subject_processed();
        log.record_stream_merged(120);
        log.record_stream_merged(30);
        log.record_gated_extraction();

        let stats = log.stats();
        assert_eq!(stats.subjects_processed, 1);
        assert_eq!(stats.streams_merged, 2);
        assert_eq!(stats.samples_merged, 150);
        assert_eq!(stats.gated_extractions, 1);
        assert_eq!(stats.run_id, log.run_id());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats").join("run_stats.json");

        let log = RunLog::with_persistence(path.clone());
        log.record_table_written();
        log.save().unwrap();

        let loaded = RunStats::load(&path).unwrap().unwrap();
        assert_eq!(loaded.run_id, log.run_id());
        assert_eq!(loaded.tables_written, 1);
        assert!(RunStats::load(&dir.path().join("none.json")).unwrap().is_none());
    }

    #[test]
    fn test_summary_format() {
        let summary = RunLog::new().summary();
        assert!(summary.contains("Subjects processed: 0"));
        assert!(summary.contains("Failed decompositions"));
    }
}
