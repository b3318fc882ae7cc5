//! Batch passes over a study: merging raw sessions and extracting features.
//!
//! Both passes work one subject at a time. A subject's streams are loaded,
//! used and dropped before the next subject starts. Errors tied to a single
//! stream, subject or event are logged and counted, never propagated; only
//! failures to read the study root or the report table end a pass.

use crate::audit::RunLog;
use crate::config::{Config, ConfigError};
use crate::core::features::{compute_features, EventFeatures, ExtractionSettings, WindowStreams};
use crate::core::report::{ReportError, ReportTable};
use crate::core::windowing::{select, AnalysisWindow, EventKind, ReportEvent};
use crate::streams::{
    read_raw_session, read_stream_table, reconstruct, write_stream_table, StreamError,
    StreamKind, StreamMerger, StreamTable, StudyLayout,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reconstruct and merge every session of one stream kind.
///
/// Returns `None` when no session directory exists for the session type.
pub fn merge_stream(
    layout: &StudyLayout,
    subject: &str,
    session_type: &str,
    kind: StreamKind,
) -> Result<Option<StreamTable>, StreamError> {
    let sessions = layout.session_dirs(subject, session_type)?;
    if sessions.is_empty() {
        return Ok(None);
    }

    let mut merger = StreamMerger::new(kind);
    for dir in sessions {
        if let Some(raw) = read_raw_session(kind, &dir.join(kind.raw_file_name()))? {
            merger.add_session(reconstruct(kind, &raw)?);
        }
    }
    Ok(Some(merger.finish()))
}

/// Merge and write all stream kinds of one subject. Returns the number of
/// tables written.
pub fn merge_subject(
    layout: &StudyLayout,
    subject: &str,
    session_types: &[String],
    log: &RunLog,
) -> usize {
    let mut written = 0;

    for session_type in session_types {
        for kind in StreamKind::ALL {
            let table = match merge_stream(layout, subject, session_type, kind) {
                Ok(Some(table)) => table,
                Ok(None) => continue,
                Err(e) => {
                    if matches!(
                        e,
                        StreamError::MalformedHeader { .. } | StreamError::MalformedRow { .. }
                    ) {
                        log.record_malformed_input();
                    }
                    tracing::warn!(subject, session_type = %session_type, stream = %kind, "skipping stream: {}", e);
                    remove_stale(&layout.merged_path(subject, session_type, kind));
                    continue;
                }
            };

            let path = layout.merged_path(subject, session_type, kind);
            match write_stream_table(&path, &table) {
                Ok(()) => {
                    log.record_stream_merged(table.len() as u64);
                    written += 1;
                    tracing::info!(subject, session_type = %session_type, stream = %kind, rows = table.len(), "merged stream written");
                }
                Err(e) => {
                    tracing::warn!(subject, session_type = %session_type, stream = %kind, "could not write merged stream: {}", e);
                }
            }
        }
    }

    written
}

/// Drop a merged table left by an earlier run so a skipped stream reads as
/// empty rather than stale.
fn remove_stale(path: &Path) {
    if !path.is_file() {
        return;
    }
    match std::fs::remove_file(path) {
        Ok(()) => tracing::info!(path = %path.display(), "removed stale merged stream"),
        Err(e) => tracing::warn!(path = %path.display(), "could not remove stale merged stream: {}", e),
    }
}

/// Merge stage over `subjects`, or over every subject when empty.
///
/// Stops between subjects once `running` is cleared.
pub fn run_merge_stage(
    config: &Config,
    subjects: &[String],
    log: &RunLog,
    running: &AtomicBool,
) -> Result<(), PipelineError> {
    let layout = config.layout();
    let subjects = if subjects.is_empty() {
        layout.subject_ids()?
    } else {
        subjects.to_vec()
    };

    for subject in &subjects {
        if !running.load(Ordering::SeqCst) {
            tracing::info!("stop requested, merge stage ends before {}", subject);
            break;
        }

        tracing::info!(subject = %subject, "merging subject");
        if merge_subject(&layout, subject, &config.session_types, log) > 0 {
            log.record_subject_processed();
        } else {
            log.record_subject_skipped();
        }
    }

    Ok(())
}

/// A subject's merged streams across all session types. Blood-volume
/// pulse is merged but not analysed, so it is not loaded.
#[derive(Debug, Clone)]
pub struct SubjectStreams {
    pub eda: StreamTable,
    pub temp: StreamTable,
    pub ibi: StreamTable,
    pub hr: StreamTable,
    pub acc: StreamTable,
}

impl SubjectStreams {
    /// Load and re-merge the per-session-type tables of `subject`.
    pub fn load(
        layout: &StudyLayout,
        subject: &str,
        session_types: &[String],
    ) -> Result<Self, StreamError> {
        let load_kind = |kind: StreamKind| -> Result<StreamTable, StreamError> {
            let mut merger = StreamMerger::new(kind);
            for session_type in session_types {
                let path = layout.merged_path(subject, session_type, kind);
                merger.add_table(read_stream_table(kind, &path)?);
            }
            Ok(merger.finish())
        };

        Ok(Self {
            eda: load_kind(StreamKind::Eda)?,
            temp: load_kind(StreamKind::Temp)?,
            ibi: load_kind(StreamKind::Ibi)?,
            hr: load_kind(StreamKind::Hr)?,
            acc: load_kind(StreamKind::Acc)?,
        })
    }

    /// True when the subject has enough conductance rows to count as
    /// having worn the device at all.
    pub fn has_recording(&self, settings: &ExtractionSettings) -> bool {
        self.eda.len() >= settings.subject_min_eda_rows
    }

    pub fn window(&self, window: &AnalysisWindow) -> WindowStreams<'_> {
        WindowStreams {
            eda: select(self.eda.samples(), window),
            temp: select(self.temp.samples(), window),
            ibi: select(self.ibi.samples(), window),
            hr: select(self.hr.samples(), window),
            acc: select(self.acc.samples(), window),
        }
    }
}

/// Features of one event; gate misses and failures are logged and counted.
pub fn extract_event(
    streams: &SubjectStreams,
    event: &ReportEvent,
    config: &Config,
    log: &RunLog,
) -> EventFeatures {
    log.record_event_processed();

    let Some(window) = AnalysisWindow::for_event(event, &config.window) else {
        return EventFeatures::empty(event.kind);
    };

    let report = compute_features(&streams.window(&window), event.kind, &config.gates);
    for (extractor, issue) in &report.issues {
        if issue.is_gate() {
            log.record_gated_extraction();
            tracing::debug!(subject = %event.subject_id, row = event.row, %extractor, "{}", issue);
        } else {
            log.record_failed_decomposition();
            tracing::warn!(
                subject = %event.subject_id,
                start = %window.start,
                end = %window.end,
                %extractor,
                "{}",
                issue
            );
        }
    }

    report.features
}

/// Outcome of a feature pass over one report table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRun {
    pub subjects: usize,
    pub events: usize,
    /// The pass ended early on a stop request
    pub stopped: bool,
}

/// Feature stage for one report table.
///
/// Events are grouped by subject. After each subject the whole output
/// table is rewritten, rows not yet reached carrying the missing marker.
pub fn run_feature_stage(
    table: &ReportTable,
    kind: EventKind,
    output: &Path,
    config: &Config,
    log: &RunLog,
    running: &AtomicBool,
) -> Result<FeatureRun, PipelineError> {
    let clock = config.survey_clock()?;
    let layout = config.layout();
    let events = table.events(kind, &config.columns, &clock)?;

    let mut by_subject: BTreeMap<&str, Vec<&ReportEvent>> = BTreeMap::new();
    for event in &events {
        by_subject
            .entry(event.subject_id.as_str())
            .or_default()
            .push(event);
    }

    let mut features = vec![EventFeatures::empty(kind); table.len()];
    let mut run = FeatureRun {
        subjects: 0,
        events: 0,
        stopped: false,
    };

    for (subject, subject_events) in by_subject {
        if !running.load(Ordering::SeqCst) {
            tracing::info!("stop requested, {} table ends before {}", kind, subject);
            run.stopped = true;
            break;
        }

        tracing::info!(subject, %kind, events = subject_events.len(), "processing subject");

        let streams = match SubjectStreams::load(&layout, subject, &config.session_types) {
            Ok(streams) => Some(streams),
            Err(e) => {
                tracing::warn!(subject, "could not load merged streams: {}", e);
                None
            }
        };

        match streams.filter(|s| s.has_recording(&config.gates)) {
            Some(streams) => {
                for event in &subject_events {
                    features[event.row] = extract_event(&streams, event, config, log);
                }
                log.record_subject_processed();
            }
            None => {
                tracing::info!(subject, "no usable recording, features left missing");
                log.record_subject_skipped();
            }
        }

        run.subjects += 1;
        run.events += subject_events.len();
        table.write_with_features(output, kind, &features, &config.missing_marker)?;
    }

    if run.subjects == 0 {
        table.write_with_features(output, kind, &features, &config.missing_marker)?;
    }
    log.record_table_written();
    tracing::info!(table = %output.display(), subjects = run.subjects, events = run.events, "feature table written");

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_merge_stream_without_sessions() {
        let dir = TempDir::new().unwrap();
        let layout = StudyLayout::new(dir.path());
        assert!(merge_stream(&layout, "sub_001", "control", StreamKind::Hr)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_header_skips_only_that_stream() {
        let dir = TempDir::new().unwrap();
        let session = dir.path().join("sub_001").join("control").join("s1");
        write(&session.join("HR.csv"), "not-a-time\n1.0\n60\n61\n");
        write(&session.join("TEMP.csv"), "1000.0\n4.0\n33.1\n33.2\n");

        let layout = StudyLayout::new(dir.path());
        let stale = layout.merged_path("sub_001", "control", StreamKind::Hr);
        write(&stale, "Time\tData\n2020-01-01T00:00:00.000000\t70\n");
        let log = RunLog::new();
        let written = merge_subject(&layout, "sub_001", &["control".to_string()], &log);

        // five kinds written (four empty), HR rejected
        assert_eq!(written, 5);
        assert_eq!(log.stats().malformed_inputs, 1);
        assert!(!stale.exists());
        let streams =
            SubjectStreams::load(&layout, "sub_001", &["control".to_string()]).unwrap();
        assert!(streams.hr.is_empty());

        let temp = read_stream_table(
            StreamKind::Temp,
            &layout.merged_path("sub_001", "control", StreamKind::Temp),
        )
        .unwrap();
        assert_eq!(temp.len(), 2);
    }

    #[test]
    fn test_subject_without_recording() {
        let dir = TempDir::new().unwrap();
        let layout = StudyLayout::new(dir.path());
        let streams =
            SubjectStreams::load(&layout, "sub_404", &["control".to_string()]).unwrap();
        assert!(!streams.has_recording(&ExtractionSettings::default()));
    }
}
