//! End-to-end tests: raw session files through merging and feature tables.

use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;
use wearable_features::{
    audit::RunLog,
    config::Config,
    core::{
        compute_features, spectral::BandPowers, AnalysisWindow, EventKind, EventTiming,
        ExtractionSettings, Extractor, FeatureError, ReportColumns, ReportEvent, ReportTable,
        SurveyClock, WindowPolicy, WindowStreams,
    },
    pipeline::{merge_subject, run_feature_stage, run_merge_stage},
    streams::{read_stream_table, StreamKind, StudyLayout, TimedSample},
};

/// 2020-09-13 12:26:40 UTC
const SESSION_START: i64 = 1_600_000_000;

fn write_file(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn regular_file(start: i64, hz: f64, values: impl Iterator<Item = f64>) -> String {
    let mut out = format!("{start}.0\n{hz}\n");
    for v in values {
        out.push_str(&format!("{v}\n"));
    }
    out
}

fn at_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn interbeat_sessions_merge_into_one_ordered_table() {
    let dir = TempDir::new().unwrap();
    let control = dir.path().join("sub_001").join("control");
    write_file(&control.join("s1").join("IBI.csv"), "1000.0, IBI\n0.0,0.8\n0.8,0.75\n");
    write_file(&control.join("s2").join("IBI.csv"), "1001.5, IBI\n0.0,0.9\n");

    let layout = StudyLayout::new(dir.path());
    let log = RunLog::new();
    merge_subject(&layout, "sub_001", &["control".to_string()], &log);

    let merged = read_stream_table(
        StreamKind::Ibi,
        &layout.merged_path("sub_001", "control", StreamKind::Ibi),
    )
    .unwrap();

    let times: Vec<DateTime<Utc>> = merged.samples().iter().map(|s| s.timestamp).collect();
    assert_eq!(
        times,
        vec![at_millis(1_000_000), at_millis(1_000_800), at_millis(1_001_500)]
    );

    let values: Vec<f64> = merged
        .samples()
        .iter()
        .map(|s| s.value.scalar().unwrap())
        .collect();
    assert!(approx(values[0], 800.0));
    assert!(approx(values[1], 750.0));
    assert!(approx(values[2], 900.0));
    assert_eq!(log.stats().malformed_inputs, 0);
}

#[test]
fn wake_window_spans_ten_minutes_before_completion() {
    let done = Utc.with_ymd_and_hms(2021, 3, 1, 8, 15, 0).unwrap();
    let event = ReportEvent {
        row: 0,
        subject_id: "sub_001".to_string(),
        kind: EventKind::Wake,
        timing: Some(EventTiming::Completion(done)),
    };

    let window = AnalysisWindow::for_event(&event, &WindowPolicy::default()).unwrap();
    assert_eq!(window.start, Utc.with_ymd_and_hms(2021, 3, 1, 8, 2, 0).unwrap());
    assert_eq!(window.end, Utc.with_ymd_and_hms(2021, 3, 1, 8, 12, 0).unwrap());
    assert!(approx(window.duration_secs(), 600.0));
}

#[test]
fn sleep_times_are_read_in_the_survey_zone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sleep.csv");
    write_file(
        &path,
        "castor_record_id,sleep_down_dt,sleep_up_dt\n\
         sub_001,2020-09-13 23:00:00,2020-09-14 07:00:00\n",
    );

    let table = ReportTable::read(&path).unwrap();
    let clock = SurveyClock::new(chrono_tz::Europe::Amsterdam, "%Y-%m-%d %H:%M:%S");
    let events = table
        .events(EventKind::Sleep, &ReportColumns::default(), &clock)
        .unwrap();

    let window = AnalysisWindow::for_event(&events[0], &WindowPolicy::default()).unwrap();
    assert_eq!(window.start, Utc.with_ymd_and_hms(2020, 9, 13, 21, 0, 0).unwrap());
    assert_eq!(window.end, Utc.with_ymd_and_hms(2020, 9, 14, 5, 0, 0).unwrap());
}

#[test]
fn constant_acceleration_has_no_motion() {
    let acc: Vec<TimedSample> = (0..40)
        .map(|i| TimedSample::triaxial(at_millis(i * 31), [1.0, 2.0, 3.0]))
        .collect();
    let streams = WindowStreams {
        acc: &acc,
        ..Default::default()
    };

    let report = compute_features(&streams, EventKind::Wake, &ExtractionSettings::default());
    let motion = &report.features.motion;
    for value in [
        motion.x_mean,
        motion.y_mean,
        motion.z_mean,
        motion.delta_mean,
        motion.x_sd,
        motion.y_sd,
        motion.z_sd,
        motion.delta_sd,
    ] {
        assert_eq!(value, Some(0.0));
    }
    assert!(!report.issues.iter().any(|(e, _)| *e == Extractor::Motion));
}

#[test]
fn flat_conductance_is_gated_as_low_signal() {
    let eda: Vec<TimedSample> = (0..60)
        .map(|i| TimedSample::scalar(at_millis(i * 250), 0.005))
        .collect();
    let streams = WindowStreams {
        eda: &eda,
        ..Default::default()
    };

    let report = compute_features(&streams, EventKind::Sleep, &ExtractionSettings::default());
    assert!(report.issues.iter().any(|(extractor, issue)| {
        *extractor == Extractor::Electrodermal && matches!(issue, FeatureError::LowSignal { .. })
    }));
    assert_eq!(report.features.electrodermal.tonic_mean, None);
    assert_eq!(report.features.storm.as_ref().unwrap().tonic_mean, None);
}

#[test]
fn band_powers_are_non_negative_and_ratio_needs_hf() {
    let beats: Vec<TimedSample> = (0..200)
        .map(|i| {
            let ms = 800.0 + 40.0 * (i as f64 * 0.8).sin();
            TimedSample::scalar(at_millis(i * 800), ms)
        })
        .collect();
    let streams = WindowStreams {
        ibi: &beats,
        ..Default::default()
    };

    let report = compute_features(&streams, EventKind::Wake, &ExtractionSettings::default());
    let cardiac = &report.features.cardiac;
    assert!(cardiac.hr_lf.unwrap() >= 0.0);
    assert!(cardiac.hr_hf.unwrap() >= 0.0);

    assert_eq!(BandPowers { lf: 2.0, hf: 0.0 }.ratio(), None);
    assert_eq!(BandPowers { lf: 2.0, hf: 4.0 }.ratio(), Some(0.5));
}

/// Tonic level with a skin conductance response every minute.
fn conductance(i: i64) -> f64 {
    let dt = (i % 240) as f64;
    0.5 + 0.6 * ((-dt / 40.0).exp() - (-dt / 8.0).exp())
}

/// Twenty minutes of recording for `sub_001` starting at SESSION_START.
fn write_study(root: &Path) {
    let session = root.join("sub_001").join("control").join("s1");
    let secs = 20 * 60;

    write_file(
        &session.join("TEMP.csv"),
        &regular_file(SESSION_START, 4.0, (0..secs * 4).map(|_| 33.0)),
    );
    write_file(
        &session.join("HR.csv"),
        &regular_file(SESSION_START, 1.0, (0..secs).map(|_| 60.0)),
    );
    write_file(
        &session.join("EDA.csv"),
        &regular_file(SESSION_START, 4.0, (0..secs * 4).map(conductance)),
    );

    let mut ibi = format!("{SESSION_START}.0, IBI\n");
    for k in 0..1500 {
        ibi.push_str(&format!("{},0.8\n", k as f64 * 0.8));
    }
    write_file(&session.join("IBI.csv"), &ibi);
}

fn read_output(path: &Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_path(path).unwrap();
    let headers = reader.headers().unwrap().iter().map(String::from).collect();
    let rows = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    (headers, rows)
}

#[test]
fn feature_stage_fills_recorded_subjects_and_leaves_the_rest_missing() {
    let dir = TempDir::new().unwrap();
    let study = dir.path().join("study");
    write_study(&study);

    let mut config = Config::default();
    config.data_root = study.clone();
    config.data_path = dir.path().join("data");

    let running = AtomicBool::new(true);
    let merge_log = RunLog::new();
    run_merge_stage(&config, &[], &merge_log, &running).unwrap();
    assert_eq!(merge_log.stats().subjects_processed, 1);
    assert_eq!(merge_log.stats().streams_merged, 6);

    let report = dir.path().join("wake.csv");
    write_file(
        &report,
        "castor_record_id,survey_completed_on,note\n\
         sub_001,2020-09-13 12:45:00,first\n\
         sub_002,2020-09-13 12:45:00,no device\n\
         sub_001,not a date,typo\n",
    );
    let table = ReportTable::read(&report).unwrap();
    let output = dir.path().join("out").join("wake_features.csv");

    let log = RunLog::new();
    let run = run_feature_stage(&table, EventKind::Wake, &output, &config, &log, &running).unwrap();
    assert_eq!(run.subjects, 2);
    assert!(!run.stopped);

    let stats = log.stats();
    assert_eq!(stats.subjects_processed, 1);
    assert_eq!(stats.subjects_skipped, 1);
    assert_eq!(stats.events_processed, 2);
    assert_eq!(stats.tables_written, 1);

    let (headers, rows) = read_output(&output);
    assert_eq!(headers.len(), 3 + 35);
    assert_eq!(&headers[..3], ["castor_record_id", "survey_completed_on", "note"]);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[1][2], "no device");

    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let value = |row: usize, name: &str| rows[row][col(name)].parse::<f64>().unwrap();

    assert!(approx(value(0, "temp_mean"), 33.0));
    assert!(approx(value(0, "hr_mean"), 60.0));
    assert!(approx(value(0, "ibi_mean"), 800.0));
    assert_eq!(rows[0][col("acc_x")], "");

    for name in ["temp_mean", "hr_mean", "ibi_mean"] {
        assert_eq!(rows[1][col(name)], "");
        assert_eq!(rows[2][col(name)], "");
    }
}

#[test]
fn stopped_feature_stage_still_writes_the_table() {
    let dir = TempDir::new().unwrap();
    let report = dir.path().join("sleep.csv");
    write_file(
        &report,
        "castor_record_id,sleep_down_dt,sleep_up_dt\n\
         sub_001,2020-09-13 23:00:00,2020-09-14 07:00:00\n",
    );

    let mut config = Config::default();
    config.data_root = dir.path().join("study");
    config.missing_marker = "NA".to_string();

    let table = ReportTable::read(&report).unwrap();
    let output = dir.path().join("sleep_features.csv");
    let running = AtomicBool::new(false);

    let run = run_feature_stage(&table, EventKind::Sleep, &output, &config, &RunLog::new(), &running)
        .unwrap();
    assert!(run.stopped);
    assert_eq!(run.subjects, 0);

    let (headers, rows) = read_output(&output);
    assert_eq!(headers.len(), 3 + 41);
    assert_eq!(headers[3], "sc_storm_tonic_mean");
    assert!(rows[0][3..].iter().all(|cell| cell == "NA"));
}

#[test]
fn sleep_table_gets_storm_and_phasic_columns() {
    let dir = TempDir::new().unwrap();
    let study = dir.path().join("study");
    write_study(&study);

    let mut config = Config::default();
    config.data_root = study;
    config.data_path = dir.path().join("data");

    let running = AtomicBool::new(true);
    let log = RunLog::new();
    run_merge_stage(&config, &[], &log, &running).unwrap();

    let report = dir.path().join("sleep.csv");
    write_file(
        &report,
        "castor_record_id,sleep_down_dt,sleep_up_dt\n\
         sub_001,2020-09-13 12:28:00,2020-09-13 12:44:00\n",
    );
    let table = ReportTable::read(&report).unwrap();
    let output = dir.path().join("sleep_features.csv");

    run_feature_stage(&table, EventKind::Sleep, &output, &config, &log, &running).unwrap();

    let (headers, rows) = read_output(&output);
    assert_eq!(headers.len(), 3 + 41);
    assert_eq!(headers[3], "sc_storm_tonic_mean");

    let col = |name: &str| headers.iter().position(|h| h == name).unwrap();
    let value = |name: &str| rows[0][col(name)].parse::<f64>().unwrap();

    assert!(value("sc_storm_tonic_mean").is_finite());
    assert!(value("sc_storm_phasic_num") >= 0.0);
    assert!(value("sc_storm_phasic_auc").is_finite());

    assert!(value("sc_phasic_num") >= 1.0);
    assert!(value("sc_phasic_mag") > 0.0);
    assert!(value("sc_phasic_dur") > 0.25);
    assert!(value("sc_tonic_mean") > 0.0);
    assert!(approx(value("temp_mean"), 33.0));
}
