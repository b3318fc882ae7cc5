//! Self-report tables: reading events in, writing feature tables out.

use crate::core::features::EventFeatures;
use crate::core::windowing::{EventKind, EventTiming, ReportEvent};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("I/O error on {path}: {source}")]
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

    #[error("{path} has no column named {column:?}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("row {row}: cannot parse {column} timestamp {value:?}")]
    BadTimestamp {
        row: usize,
        column: String,
        value: String,
    },
}

/// Names of the report columns the pipeline reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportColumns {
    pub subject: String,
    /// Survey completion (wake reports)
    pub completed: String,
    /// Reported sleep onset
    pub sleep_onset: String,
    /// Reported sleep offset
    pub sleep_offset: String,
}

impl Default for ReportColumns {
    fn default() -> Self {
        Self {
            subject: "castor_record_id".to_string(),
            completed: "survey_completed_on".to_string(),
            sleep_onset: "sleep_down_dt".to_string(),
            sleep_offset: "sleep_up_dt".to_string(),
        }
    }
}

/// Parses naive survey timestamps in a fixed zone.
#[derive(Debug, Clone)]
pub struct SurveyClock {
    zone: Tz,
    format: String,
}

impl SurveyClock {
    pub fn new(zone: Tz, format: impl Into<String>) -> Self {
        Self {
            zone,
            format: format.into(),
        }
    }

    /// Parse `text`; ambiguous local times resolve to the earlier instant,
    /// nonexistent ones to `None`.
    pub fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        let naive = NaiveDateTime::parse_from_str(text.trim(), &self.format).ok()?;
        self.zone
            .from_local_datetime(&naive)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

impl Default for SurveyClock {
    fn default() -> Self {
        Self::new(Tz::UTC, "%Y-%m-%d %H:%M:%S")
    }
}

/// An input report table held in memory with its original columns.
#[derive(Debug, Clone)]
pub struct ReportTable {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ReportTable {
    pub fn read(path: &Path) -> Result<Self, ReportError> {
        let csv_err = |source| ReportError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(csv_err)?;

        let headers = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&self, name: &str) -> Result<usize, ReportError> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| ReportError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }

    fn cell(&self, row: usize, column: usize) -> &str {
        self.rows[row].get(column).map(String::as_str).unwrap_or("")
    }

    /// One event per row. Rows whose timestamps do not parse become events
    /// without timing.
    pub fn events(
        &self,
        kind: EventKind,
        columns: &ReportColumns,
        clock: &SurveyClock,
    ) -> Result<Vec<ReportEvent>, ReportError> {
        let subject = self.column(&columns.subject)?;
        let time_columns = match kind {
            EventKind::Wake => vec![(self.column(&columns.completed)?, &columns.completed)],
            EventKind::Sleep => vec![
                (self.column(&columns.sleep_onset)?, &columns.sleep_onset),
                (self.column(&columns.sleep_offset)?, &columns.sleep_offset),
            ],
        };

        let events = (0..self.rows.len())
            .map(|row| {
                let parsed: Result<Vec<DateTime<Utc>>, ReportError> = time_columns
                    .iter()
                    .map(|&(idx, name)| {
                        let value = self.cell(row, idx);
                        clock.parse(value).ok_or_else(|| ReportError::BadTimestamp {
                            row,
                            column: name.clone(),
                            value: value.to_string(),
                        })
                    })
                    .collect();

                let timing = match parsed {
                    Ok(times) => match times.as_slice() {
                        [done] => Some(EventTiming::Completion(*done)),
                        [onset, offset] => Some(EventTiming::Interval {
                            onset: *onset,
                            offset: *offset,
                        }),
                        _ => None,
                    },
                    Err(e) => {
                        tracing::warn!(table = %self.path.display(), "{}", e);
                        None
                    }
                };

                ReportEvent {
                    row,
                    subject_id: self.cell(row, subject).trim().to_string(),
                    kind,
                    timing,
                }
            })
            .collect();

        Ok(events)
    }

    /// Write the table with one feature record per row, replacing `path`
    /// atomically. Feature columns already present are overwritten in
    /// place; the rest are appended.
    pub fn write_with_features(
        &self,
        path: &Path,
        kind: EventKind,
        features: &[EventFeatures],
        missing_marker: &str,
    ) -> Result<(), ReportError> {
        let mut headers = self.headers.clone();
        let slots: Vec<usize> = EventFeatures::column_names(kind)
            .into_iter()
            .map(|name| match headers.iter().position(|h| h == name) {
                Some(idx) => idx,
                None => {
                    headers.push(name.to_string());
                    headers.len() - 1
                }
            })
            .collect();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ReportError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp = path.with_extension("csv.tmp");
        let csv_err = |source| ReportError::Csv {
            path: tmp.clone(),
            source,
        };

        let mut writer = csv::Writer::from_path(&tmp).map_err(csv_err)?;
        writer.write_record(&headers).map_err(csv_err)?;

        for (row, cells) in self.rows.iter().enumerate() {
            let mut out = cells.clone();
            out.resize(headers.len(), String::new());

            let record = features
                .get(row)
                .cloned()
                .unwrap_or_else(|| EventFeatures::empty(kind));
            for (slot, (_, value)) in slots.iter().zip(record.columns()) {
                out[*slot] = match value {
                    Some(v) => v.to_string(),
                    None => missing_marker.to_string(),
                };
            }
            writer.write_record(&out).map_err(csv_err)?;
        }

        writer.flush().map_err(|source| ReportError::Io {
            path: tmp.clone(),
            source,
        })?;
        drop(writer);

        fs::rename(&tmp, path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Output location for the features of `input`: `<stem>_features.csv` in
/// `output_dir`.
pub fn features_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "report".to_string());
    output_dir.join(format!("{stem}_features.csv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn write_table(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_survey_clock_zones() {
        let utc = SurveyClock::default();
        let t = utc.parse("2020-09-13 12:26:40").unwrap();
        assert_eq!(t.timestamp(), 1_600_000_000);

        let amsterdam = SurveyClock::new(chrono_tz::Europe::Amsterdam, "%Y-%m-%d %H:%M:%S");
        let local = amsterdam.parse("2020-09-13 14:26:40").unwrap();
        assert_eq!(local, t);

        assert!(utc.parse("13/09/2020").is_none());
    }

    #[test]
    fn test_wake_events() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "wake.csv",
            "castor_record_id,survey_completed_on,mood\n\
             sub_001,2020-09-13 12:26:40,3\n\
             sub_002,not a time,4\n",
        );

        let table = ReportTable::read(&path).unwrap();
        let events = table
            .events(EventKind::Wake, &ReportColumns::default(), &SurveyClock::default())
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].subject_id, "sub_001");
        assert!(matches!(events[0].timing, Some(EventTiming::Completion(_))));
        assert_eq!(events[1].row, 1);
        assert!(events[1].timing.is_none());
    }

    #[test]
    fn test_sleep_events() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "sleep.csv",
            "castor_record_id,survey_completed_on,sleep_down_dt,sleep_up_dt\n\
             sub_001,2020-09-14 08:00:00,2020-09-13 23:00:00,2020-09-14 07:00:00\n",
        );

        let table = ReportTable::read(&path).unwrap();
        let events = table
            .events(EventKind::Sleep, &ReportColumns::default(), &SurveyClock::default())
            .unwrap();

        match events[0].timing {
            Some(EventTiming::Interval { onset, offset }) => {
                assert_eq!(offset - onset, Duration::hours(8));
            }
            ref other => panic!("unexpected timing {other:?}"),
        }
    }

    #[test]
    fn test_missing_column() {
        let dir = TempDir::new().unwrap();
        let path = write_table(&dir, "wake.csv", "castor_record_id,other\nsub_001,1\n");

        let table = ReportTable::read(&path).unwrap();
        let err = table
            .events(EventKind::Wake, &ReportColumns::default(), &SurveyClock::default())
            .unwrap_err();
        assert!(matches!(err, ReportError::MissingColumn { ref column, .. } if column == "survey_completed_on"));
    }

    #[test]
    fn test_write_with_features() {
        let dir = TempDir::new().unwrap();
        let path = write_table(
            &dir,
            "wake.csv",
            "castor_record_id,survey_completed_on,hr_mean\nsub_001,2020-09-13 12:26:40,old\nsub_002,2020-09-13 12:26:40,old\n",
        );
        let table = ReportTable::read(&path).unwrap();

        let mut first = EventFeatures::empty(EventKind::Wake);
        first.cardiac.hr_mean = Some(61.5);
        first.temperature.slope = Some(0.0);

        let out = dir.path().join("out").join("wake_features.csv");
        table
            .write_with_features(&out, EventKind::Wake, &[first], "NA")
            .unwrap();

        let written = ReportTable::read(&out).unwrap();
        let names = EventFeatures::column_names(EventKind::Wake);
        // hr_mean reused in place, the rest appended
        assert_eq!(written.headers().len(), 2 + names.len());
        assert_eq!(written.headers()[2], "hr_mean");

        let hr = written.column("hr_mean").unwrap();
        let slope = written.column("temp_slope").unwrap();
        let quality = written.column("ibi_based_quality").unwrap();
        assert_eq!(written.cell(0, hr), "61.5");
        assert_eq!(written.cell(0, slope), "0");
        assert_eq!(written.cell(0, quality), "NA");
        assert_eq!(written.cell(1, hr), "NA");
        assert_eq!(written.cell(1, 0), "sub_002");
        assert!(!out.with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_features_path() {
        let path = features_path(Path::new("/data/EMA_Clean.csv"), Path::new("/out"));
        assert_eq!(path, PathBuf::from("/out/EMA_Clean_features.csv"));
    }
}
