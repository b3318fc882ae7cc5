//! File access for raw session exports and merged stream tables.
//!
//! Directory layout under the study root:
//!
//! ```text
//! <root>/<subject>/<session_type>/<session>/<KIND>.csv     raw device export
//! <root>/<subject>/<session_type>/merge/full_<KIND>.csv    merged stream
//! ```
//!
//! Absent files and directories are treated as "no data", never as errors.

use crate::streams::merge::merge_sessions;
use crate::streams::reconstruct::RawSession;
use crate::streams::types::{
    ReconstructionMode, SampleValue, StreamError, StreamKind, StreamTable, TimedSample,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-session-type output directory.
pub const MERGE_DIR: &str = "merge";

/// Timestamp format of the `Time` column in merged files.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Formats accepted when reading a `Time` column back.
const TIME_PARSE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

const ACC_COLUMNS: [&str; 3] = ["ACC_X", "ACC_Y", "ACC_Z"];

/// Paths of a study's recordings.
#[derive(Debug, Clone)]
pub struct StudyLayout {
    root: PathBuf,
}

impl StudyLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subject directories directly under the root, sorted by name.
    pub fn subject_ids(&self) -> Result<Vec<String>, StreamError> {
        let mut ids: Vec<String> = list_dirs(&self.root)?
            .into_iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn session_type_dir(&self, subject: &str, session_type: &str) -> PathBuf {
        self.root.join(subject).join(session_type)
    }

    /// Raw session directories of one session type, sorted, excluding `merge/`.
    pub fn session_dirs(&self, subject: &str, session_type: &str) -> Result<Vec<PathBuf>, StreamError> {
        let dir = self.session_type_dir(subject, session_type);
        let mut dirs: Vec<PathBuf> = list_dirs(&dir)?
            .into_iter()
            .filter(|p| p.file_name().map(|n| n != MERGE_DIR).unwrap_or(false))
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    pub fn merged_path(&self, subject: &str, session_type: &str, kind: StreamKind) -> PathBuf {
        self.session_type_dir(subject, session_type)
            .join(MERGE_DIR)
            .join(kind.merged_file_name())
    }
}

/// Child directories of `dir`; an absent directory has none.
fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, StreamError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|source| StreamError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    Ok(entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect())
}

fn parse_header(path: &Path, field: &'static str, raw: Option<&str>) -> Result<f64, StreamError> {
    let value = raw.unwrap_or_default();
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| StreamError::MalformedHeader {
            path: path.to_path_buf(),
            field,
            value: value.to_string(),
        })
}

/// Read one raw session file.
///
/// Returns `Ok(None)` when the file is absent or empty.
pub fn read_raw_session(kind: StreamKind, path: &Path) -> Result<Option<RawSession>, StreamError> {
    if !path.is_file() {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| StreamError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record.map_err(|source| StreamError::Csv {
            path: path.to_path_buf(),
            source,
        })?,
        None => return Ok(None),
    };
    let start_time = parse_header(path, "start_time", header.get(0))?;

    let mut session = RawSession {
        source: path.to_path_buf(),
        start_time,
        sampling_frequency: None,
        rows: Vec::new(),
    };

    if kind.mode() != ReconstructionMode::OnsetOffset {
        match records.next() {
            Some(record) => {
                let record = record.map_err(|source| StreamError::Csv {
                    path: path.to_path_buf(),
                    source,
                })?;
                session.sampling_frequency =
                    Some(parse_header(path, "sampling_frequency", record.get(0))?);
            }
            None => return Ok(Some(session)),
        }
    }

    let width = kind.value_columns();
    for record in records {
        let record = record.map_err(|source| StreamError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        let row = record
            .iter()
            .take(width)
            .map(|field| field.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| StreamError::MalformedRow {
                path: path.to_path_buf(),
                line,
                reason: e.to_string(),
            })?;
        session.rows.push(row);
    }

    Ok(Some(session))
}

/// Write a merged table as a tab-delimited file.
///
/// The file is written next to its destination and renamed into place.
pub fn write_stream_table(path: &Path, table: &StreamTable) -> Result<(), StreamError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StreamError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let tmp = path.with_extension("csv.tmp");
    let csv_err = |source| StreamError::Csv {
        path: tmp.clone(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(&tmp)
        .map_err(csv_err)?;

    if table.kind() == StreamKind::Acc {
        writer
            .write_record(["Time", ACC_COLUMNS[0], ACC_COLUMNS[1], ACC_COLUMNS[2]])
            .map_err(csv_err)?;
    } else {
        writer.write_record(["Time", "Data"]).map_err(csv_err)?;
    }

    for sample in table.samples() {
        let time = sample.timestamp.format(TIME_FORMAT).to_string();
        match sample.value {
            SampleValue::Scalar(v) => writer.write_record([time, v.to_string()]),
            SampleValue::Triaxial([x, y, z]) => {
                writer.write_record([time, x.to_string(), y.to_string(), z.to_string()])
            }
        }
        .map_err(csv_err)?;
    }

    writer.flush().map_err(|source| StreamError::Io {
        path: tmp.clone(),
        source,
    })?;
    drop(writer);

    fs::rename(&tmp, path).map_err(|source| StreamError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_time(raw: &str) -> Option<DateTime<Utc>> {
    TIME_PARSE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|t| t.and_utc())
}

/// Read a merged stream file. An absent file yields an empty table.
pub fn read_stream_table(kind: StreamKind, path: &Path) -> Result<StreamTable, StreamError> {
    if !path.is_file() {
        return Ok(StreamTable::empty(kind));
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| StreamError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let headers = reader
        .headers()
        .map_err(|source| StreamError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| StreamError::MalformedHeader {
                path: path.to_path_buf(),
                field: "column",
                value: name.to_string(),
            })
    };

    let time_col = column("Time")?;
    let value_cols = if kind == StreamKind::Acc {
        ACC_COLUMNS
            .iter()
            .map(|c| column(*c))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        vec![column("Data")?]
    };

    let mut samples = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| StreamError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        let malformed = |reason: String| StreamError::MalformedRow {
            path: path.to_path_buf(),
            line,
            reason,
        };

        let raw_time = record.get(time_col).unwrap_or_default();
        let timestamp =
            parse_time(raw_time).ok_or_else(|| malformed(format!("bad time {raw_time:?}")))?;

        let mut values = [0.0; 3];
        for (slot, &col) in values.iter_mut().zip(&value_cols) {
            let raw = record.get(col).unwrap_or_default();
            // Missing cells are carried as NaN, like an empty spreadsheet cell.
            *slot = if raw.is_empty() {
                f64::NAN
            } else {
                raw.parse()
                    .map_err(|_| malformed(format!("bad value {raw:?}")))?
            };
        }

        samples.push(if kind == StreamKind::Acc {
            TimedSample::triaxial(timestamp, values)
        } else {
            TimedSample::scalar(timestamp, values[0])
        });
    }

    Ok(merge_sessions(kind, [samples]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::types::{instant_from_epoch, scalar_values};
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_regular_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "TEMP.csv", "1528387233.000000\n4.000000\n31.5\n31.6\n");

        let session = read_raw_session(StreamKind::Temp, &path).unwrap().unwrap();
        assert_eq!(session.start_time, 1528387233.0);
        assert_eq!(session.sampling_frequency, Some(4.0));
        assert_eq!(session.rows, vec![vec![31.5], vec![31.6]]);
    }

    #[test]
    fn test_read_acc_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "ACC.csv",
            "100.0, 100.0, 100.0\n32.0, 32.0, 32.0\n-1,2,63\n0,3,62\n",
        );

        let session = read_raw_session(StreamKind::Acc, &path).unwrap().unwrap();
        assert_eq!(session.sampling_frequency, Some(32.0));
        assert_eq!(session.rows[0], vec![-1.0, 2.0, 63.0]);
    }

    #[test]
    fn test_read_ibi_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "IBI.csv", "1000.0, IBI\n0.0,0.8\n0.8,0.75\n");

        let session = read_raw_session(StreamKind::Ibi, &path).unwrap().unwrap();
        assert_eq!(session.sampling_frequency, None);
        assert_eq!(session.rows.len(), 2);
    }

    #[test]
    fn test_empty_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write_file(dir.path(), "IBI.csv", "");

        assert!(read_raw_session(StreamKind::Ibi, &empty).unwrap().is_none());
        assert!(read_raw_session(StreamKind::Eda, &dir.path().join("EDA.csv"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_start_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "EDA.csv", "not-a-time\n4.0\n0.1\n");

        let err = read_raw_session(StreamKind::Eda, &path).unwrap_err();
        assert!(matches!(
            err,
            StreamError::MalformedHeader {
                field: "start_time",
                ..
            }
        ));
    }

    #[test]
    fn test_merged_table_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merge").join("full_HR.csv");
        let t0 = instant_from_epoch(1_600_000_000.5).unwrap();
        let table = merge_sessions(
            StreamKind::Hr,
            [vec![
                TimedSample::scalar(t0, 61.0),
                TimedSample::scalar(t0 + chrono::Duration::seconds(1), 62.5),
            ]],
        );

        write_stream_table(&path, &table).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Time\tData\n2020-09-13T12:26:40.500000\t61"));

        let back = read_stream_table(StreamKind::Hr, &path).unwrap();
        assert_eq!(back, table);
        assert_eq!(scalar_values(back.samples()), vec![61.0, 62.5]);
    }

    #[test]
    fn test_layout_skips_merge_dir() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StudyLayout::new(dir.path());
        for session in ["1528387233_A01", "1528000000_A01", MERGE_DIR] {
            fs::create_dir_all(layout.session_type_dir("sub_001", "control").join(session)).unwrap();
        }

        let dirs = layout.session_dirs("sub_001", "control").unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("1528000000_A01"));
        assert_eq!(layout.subject_ids().unwrap(), vec!["sub_001".to_string()]);
        assert!(layout.session_dirs("sub_002", "stress").unwrap().is_empty());
    }
}
