//! Stream kinds, timed samples and merged stream tables.
//!
//! A `TimedSample` carries an absolute UTC instant. Per-session offsets are
//! resolved into instants by the reconstructor; nothing downstream deals with
//! session-relative positions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// The closed set of wristband streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamKind {
    /// Electrodermal activity (skin conductance, µS)
    Eda,
    /// Skin temperature (°C)
    Temp,
    /// Interbeat interval (onset offset + duration)
    Ibi,
    /// Blood-volume pulse
    Bvp,
    /// Heart rate (bpm)
    Hr,
    /// Triaxial acceleration
    Acc,
}

/// How a raw session file maps rows to timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructionMode {
    /// `start + i / frequency`, one value per row
    RegularInterval,
    /// Same as regular interval, three values per row
    Triaxial,
    /// `start + onset_offset`, value is the interval duration
    OnsetOffset,
}

impl StreamKind {
    /// Every stream kind, in the order the merge stage processes them.
    pub const ALL: [StreamKind; 6] = [
        StreamKind::Eda,
        StreamKind::Temp,
        StreamKind::Ibi,
        StreamKind::Bvp,
        StreamKind::Hr,
        StreamKind::Acc,
    ];

    /// File stem used by the device export (`EDA`, `TEMP`, ...).
    pub fn file_stem(&self) -> &'static str {
        match self {
            StreamKind::Eda => "EDA",
            StreamKind::Temp => "TEMP",
            StreamKind::Ibi => "IBI",
            StreamKind::Bvp => "BVP",
            StreamKind::Hr => "HR",
            StreamKind::Acc => "ACC",
        }
    }

    /// Name of the raw per-session file.
    pub fn raw_file_name(&self) -> String {
        format!("{}.csv", self.file_stem())
    }

    /// Name of the merged per-session-type file.
    pub fn merged_file_name(&self) -> String {
        format!("full_{}.csv", self.file_stem())
    }

    pub fn mode(&self) -> ReconstructionMode {
        match self {
            StreamKind::Acc => ReconstructionMode::Triaxial,
            StreamKind::Ibi => ReconstructionMode::OnsetOffset,
            _ => ReconstructionMode::RegularInterval,
        }
    }

    /// Number of value columns a data row carries.
    pub fn value_columns(&self) -> usize {
        match self.mode() {
            ReconstructionMode::RegularInterval => 1,
            ReconstructionMode::Triaxial => 3,
            ReconstructionMode::OnsetOffset => 2,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// A sample value: scalar for most streams, X/Y/Z for acceleration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SampleValue {
    Scalar(f64),
    Triaxial([f64; 3]),
}

impl SampleValue {
    /// Scalar value, or `None` for triaxial samples.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            SampleValue::Scalar(v) => Some(*v),
            SampleValue::Triaxial(_) => None,
        }
    }

    /// Single axis of a triaxial sample.
    pub fn axis(&self, axis: usize) -> Option<f64> {
        match self {
            SampleValue::Triaxial(xyz) => xyz.get(axis).copied(),
            SampleValue::Scalar(_) => None,
        }
    }
}

/// One sample at an absolute instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedSample {
    pub timestamp: DateTime<Utc>,
    pub value: SampleValue,
}

impl TimedSample {
    pub fn scalar(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            timestamp,
            value: SampleValue::Scalar(value),
        }
    }

    pub fn triaxial(timestamp: DateTime<Utc>, xyz: [f64; 3]) -> Self {
        Self {
            timestamp,
            value: SampleValue::Triaxial(xyz),
        }
    }
}

/// Time-ordered samples of one stream kind.
///
/// Built by [`StreamMerger`](crate::streams::StreamMerger) or read back from a
/// merged stream file; either way the samples are sorted ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTable {
    kind: StreamKind,
    samples: Vec<TimedSample>,
}

impl StreamTable {
    /// An empty table.
    pub fn empty(kind: StreamKind) -> Self {
        Self {
            kind,
            samples: Vec::new(),
        }
    }

    /// Wrap samples that are already in ascending time order.
    pub(crate) fn from_sorted(kind: StreamKind, samples: Vec<TimedSample>) -> Self {
        debug_assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Self { kind, samples }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn samples(&self) -> &[TimedSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub(crate) fn into_samples(self) -> Vec<TimedSample> {
        self.samples
    }
}

/// Scalar values of a sample slice (triaxial samples are skipped).
pub fn scalar_values(samples: &[TimedSample]) -> Vec<f64> {
    samples.iter().filter_map(|s| s.value.scalar()).collect()
}

/// One axis of a triaxial sample slice.
pub fn axis_values(samples: &[TimedSample], axis: usize) -> Vec<f64> {
    samples.iter().filter_map(|s| s.value.axis(axis)).collect()
}

/// Convert epoch seconds (fractional) to an instant.
pub fn instant_from_epoch(seconds: f64) -> Option<DateTime<Utc>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as i64;
    DateTime::from_timestamp(whole as i64, 0).map(|t| t + Duration::nanoseconds(nanos))
}

/// Convert a span in seconds to a chrono duration at nanosecond resolution.
pub fn seconds(span: f64) -> Duration {
    Duration::nanoseconds((span * 1e9).round() as i64)
}

/// Errors raised while reading or reconstructing stream files.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("malformed {field} header in {path}: {value:?}")]
    MalformedHeader {
        path: PathBuf,
        field: &'static str,
        value: String,
    },
    #[error("malformed row {line} in {path}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_names() {
        assert_eq!(StreamKind::Eda.raw_file_name(), "EDA.csv");
        assert_eq!(StreamKind::Acc.merged_file_name(), "full_ACC.csv");
        assert_eq!(StreamKind::Ibi.to_string(), "IBI");
    }

    #[test]
    fn test_modes() {
        assert_eq!(StreamKind::Acc.mode(), ReconstructionMode::Triaxial);
        assert_eq!(StreamKind::Ibi.mode(), ReconstructionMode::OnsetOffset);
        for kind in [StreamKind::Eda, StreamKind::Temp, StreamKind::Bvp, StreamKind::Hr] {
            assert_eq!(kind.mode(), ReconstructionMode::RegularInterval);
            assert_eq!(kind.value_columns(), 1);
        }
    }

    #[test]
    fn test_instant_from_epoch_fraction() {
        let t = instant_from_epoch(1000.25).unwrap();
        assert_eq!(t.timestamp(), 1000);
        assert_eq!(t.timestamp_subsec_millis(), 250);
        assert!(instant_from_epoch(f64::NAN).is_none());
    }

    #[test]
    fn test_sample_value_accessors() {
        let s = SampleValue::Triaxial([1.0, 2.0, 3.0]);
        assert_eq!(s.axis(1), Some(2.0));
        assert_eq!(s.scalar(), None);
        assert_eq!(SampleValue::Scalar(4.0).scalar(), Some(4.0));
    }
}
