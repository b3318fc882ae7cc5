//! Absolute timestamp reconstruction for raw session files.
//!
//! A raw session carries its start time (epoch seconds) as a header scalar.
//! Regular streams add a sampling frequency row; interbeat sessions instead
//! carry per-beat onset offsets. See [`ReconstructionMode`].

use crate::streams::types::{
    instant_from_epoch, seconds, ReconstructionMode, StreamError, StreamKind, TimedSample,
};
use std::path::PathBuf;

/// One parsed raw session: header scalars plus numeric data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSession {
    /// File the session was read from (error context only)
    pub source: PathBuf,
    /// Session start, seconds since the Unix epoch
    pub start_time: f64,
    /// Sampling frequency in Hz (absent for interbeat sessions)
    pub sampling_frequency: Option<f64>,
    /// Data rows, header and frequency rows already consumed
    pub rows: Vec<Vec<f64>>,
}

/// Rebuild absolute timestamps for one session of `kind`.
///
/// A session with no data rows yields an empty vector. Header values that are
/// not usable numbers are reported as [`StreamError::MalformedHeader`].
pub fn reconstruct(kind: StreamKind, session: &RawSession) -> Result<Vec<TimedSample>, StreamError> {
    if session.rows.is_empty() {
        return Ok(Vec::new());
    }

    let start = instant_from_epoch(session.start_time).ok_or_else(|| {
        StreamError::MalformedHeader {
            path: session.source.clone(),
            field: "start_time",
            value: session.start_time.to_string(),
        }
    })?;

    let width = kind.value_columns();
    for (i, row) in session.rows.iter().enumerate() {
        if row.len() < width {
            return Err(StreamError::MalformedRow {
                path: session.source.clone(),
                line: i,
                reason: format!("expected {width} values, found {}", row.len()),
            });
        }
    }

    match kind.mode() {
        ReconstructionMode::OnsetOffset => Ok(session
            .rows
            .iter()
            .map(|row| TimedSample::scalar(start + seconds(row[0]), row[1] * 1000.0))
            .collect()),
        mode => {
            let frequency = session
                .sampling_frequency
                .filter(|f| f.is_finite() && *f > 0.0)
                .ok_or_else(|| StreamError::MalformedHeader {
                    path: session.source.clone(),
                    field: "sampling_frequency",
                    value: session
                        .sampling_frequency
                        .map(|f| f.to_string())
                        .unwrap_or_default(),
                })?;

            let period = 1.0 / frequency;
            Ok(session
                .rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let timestamp = start + seconds(i as f64 * period);
                    if mode == ReconstructionMode::Triaxial {
                        TimedSample::triaxial(timestamp, [row[0], row[1], row[2]])
                    } else {
                        TimedSample::scalar(timestamp, row[0])
                    }
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::types::SampleValue;

    fn session(start: f64, freq: Option<f64>, rows: Vec<Vec<f64>>) -> RawSession {
        RawSession {
            source: PathBuf::from("test.csv"),
            start_time: start,
            sampling_frequency: freq,
            rows,
        }
    }

    #[test]
    fn test_regular_interval_spacing() {
        let rows = (0..40).map(|i| vec![i as f64 * 0.1]).collect();
        let samples = reconstruct(StreamKind::Eda, &session(1_600_000_000.0, Some(4.0), rows)).unwrap();

        assert_eq!(samples.len(), 40);
        let t0 = samples[0].timestamp;
        for (i, s) in samples.iter().enumerate() {
            assert_eq!(s.timestamp, t0 + seconds(i as f64 / 4.0));
        }
        assert!(samples.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_triaxial_rows() {
        let rows = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let samples = reconstruct(StreamKind::Acc, &session(100.0, Some(32.0), rows)).unwrap();

        assert_eq!(samples[1].value, SampleValue::Triaxial([4.0, 5.0, 6.0]));
        assert_eq!(samples[1].timestamp - samples[0].timestamp, seconds(1.0 / 32.0));
    }

    #[test]
    fn test_onset_offset_mode() {
        let rows = vec![vec![0.0, 0.8], vec![0.8, 0.75]];
        let samples = reconstruct(StreamKind::Ibi, &session(1000.0, None, rows)).unwrap();

        assert_eq!(samples[0].value, SampleValue::Scalar(800.0));
        assert_eq!(samples[1].value, SampleValue::Scalar(750.0));
        assert_eq!(samples[1].timestamp, instant_from_epoch(1000.8).unwrap());
    }

    #[test]
    fn test_empty_session_is_not_an_error() {
        let samples = reconstruct(StreamKind::Ibi, &session(f64::NAN, None, Vec::new())).unwrap();
        assert!(samples.is_empty());
    }

    #[test]
    fn test_missing_frequency_is_malformed_header() {
        let err = reconstruct(StreamKind::Temp, &session(100.0, None, vec![vec![31.0]])).unwrap_err();
        assert!(matches!(
            err,
            StreamError::MalformedHeader {
                field: "sampling_frequency",
                ..
            }
        ));
    }

    #[test]
    fn test_short_row_is_rejected() {
        let err = reconstruct(StreamKind::Acc, &session(100.0, Some(32.0), vec![vec![1.0, 2.0]]))
            .unwrap_err();
        assert!(matches!(err, StreamError::MalformedRow { line: 0, .. }));
    }
}
