//! Feature records computed from analysis windows.
//!
//! Every feature is an `Option<f64>`: `None` is the explicit missing marker
//! for a feature whose extractor was gated out or failed. A computed value is
//! never replaced by zero to signal absence.

use crate::core::electrodermal::{self, ElectrodermalDecomposer};
use crate::core::spectral;
use crate::core::summary;
use crate::core::windowing::{leading_fraction, EventKind};
use crate::streams::TimedSample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fraction of a sleep window analysed as the early "storm" sub-window.
pub const STORM_FRACTION: f64 = 0.25;

/// The extractors that fill a feature record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extractor {
    Spectral,
    Electrodermal,
    Storm,
    Temperature,
    Motion,
}

impl std::fmt::Display for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Extractor::Spectral => "spectral",
            Extractor::Electrodermal => "electrodermal",
            Extractor::Storm => "storm",
            Extractor::Temperature => "temperature",
            Extractor::Motion => "motion",
        };
        f.write_str(name)
    }
}

/// Why an extractor produced no values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    /// Too few samples in the window
    #[error("{samples} samples in window, need more than {required}")]
    InsufficientWindow { samples: usize, required: usize },
    /// Conductance too low to be a worn sensor
    #[error("mean conductance {mean:.4} not above floor {floor}")]
    LowSignal { mean: f64, floor: f64 },
    /// The algorithm itself failed on this window
    #[error("decomposition failed during {stage}: {reason}")]
    DecompositionFailure { stage: &'static str, reason: String },
}

impl FeatureError {
    /// True for gate misses, false for algorithm failures.
    pub fn is_gate(&self) -> bool {
        !matches!(self, FeatureError::DecompositionFailure { .. })
    }
}

/// Thresholds and constants used by the extractors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Spectral analysis needs more than this many interbeat rows
    pub spectral_min_ibi: usize,
    /// Decomposition needs more than this many conductance samples
    pub eda_min_samples: usize,
    /// Decomposition needs mean conductance above this floor (µS)
    pub eda_min_mean: f64,
    /// Temperature summary needs more than this many samples
    pub temp_min_samples: usize,
    /// Motion summary needs more than this many samples
    pub acc_min_samples: usize,
    /// A subject with fewer merged conductance rows is not processed
    pub subject_min_eda_rows: usize,
    /// Nominal window length used by the interbeat quality index
    pub quality_nominal_secs: f64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            spectral_min_ibi: 50,
            eda_min_samples: 20,
            eda_min_mean: 0.009,
            temp_min_samples: 10,
            acc_min_samples: 20,
            subject_min_eda_rows: 5,
            quality_nominal_secs: 600.0,
        }
    }
}

/// Heart-rate and interbeat features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardiacFeatures {
    pub hr_mean: Option<f64>,
    pub ibi_sd: Option<f64>,
    pub ibi_mean: Option<f64>,
    pub ibi_min: Option<f64>,
    pub ibi_max: Option<f64>,
    /// Root mean square of successive interbeat differences
    pub hr_rmssd: Option<f64>,
    pub hr_sd: Option<f64>,
    pub hr_min: Option<f64>,
    pub hr_max: Option<f64>,
    /// High-frequency band power (0.15-0.4 Hz)
    pub hr_hf: Option<f64>,
    /// Low-frequency band power (0.05-0.15 Hz)
    pub hr_lf: Option<f64>,
    pub hr_lfhf: Option<f64>,
    /// Fraction of the nominal window covered by beats
    pub ibi_based_quality: Option<f64>,
}

/// Tonic/phasic skin conductance features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElectrodermalFeatures {
    pub tonic_mean: Option<f64>,
    pub tonic_std: Option<f64>,
    pub tonic_range: Option<f64>,
    pub phasic_mean: Option<f64>,
    pub phasic_std: Option<f64>,
    pub phasic_range: Option<f64>,
    pub phasic_magnitude: Option<f64>,
    pub phasic_duration: Option<f64>,
    pub phasic_peaks: Option<f64>,
    pub phasic_auc: Option<f64>,
}

/// Abbreviated conductance features of the early sleep sub-window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StormFeatures {
    pub tonic_mean: Option<f64>,
    pub phasic_mean: Option<f64>,
    pub phasic_magnitude: Option<f64>,
    pub phasic_duration: Option<f64>,
    pub phasic_peaks: Option<f64>,
    pub phasic_auc: Option<f64>,
}

/// Skin temperature summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureFeatures {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub sd: Option<f64>,
    /// Least-squares slope per sample
    pub slope: Option<f64>,
}

/// Movement summary from differenced acceleration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionFeatures {
    pub x_mean: Option<f64>,
    pub y_mean: Option<f64>,
    pub z_mean: Option<f64>,
    pub delta_mean: Option<f64>,
    pub x_sd: Option<f64>,
    pub y_sd: Option<f64>,
    pub z_sd: Option<f64>,
    pub delta_sd: Option<f64>,
}

/// All features for one report event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFeatures {
    pub cardiac: CardiacFeatures,
    pub electrodermal: ElectrodermalFeatures,
    /// Present for sleep events only
    pub storm: Option<StormFeatures>,
    pub temperature: TemperatureFeatures,
    pub motion: MotionFeatures,
}

impl EventFeatures {
    /// A record with every feature missing.
    pub fn empty(kind: EventKind) -> Self {
        Self {
            cardiac: CardiacFeatures::default(),
            electrodermal: ElectrodermalFeatures::default(),
            storm: (kind == EventKind::Sleep).then(StormFeatures::default),
            temperature: TemperatureFeatures::default(),
            motion: MotionFeatures::default(),
        }
    }

    /// Output columns in table order.
    pub fn columns(&self) -> Vec<(&'static str, Option<f64>)> {
        let mut cols = Vec::with_capacity(41);

        if let Some(s) = &self.storm {
            cols.extend([
                ("sc_storm_tonic_mean", s.tonic_mean),
                ("sc_storm_phasic_mean", s.phasic_mean),
                ("sc_storm_phasic_mag", s.phasic_magnitude),
                ("sc_storm_phasic_dur", s.phasic_duration),
                ("sc_storm_phasic_num", s.phasic_peaks),
                ("sc_storm_phasic_auc", s.phasic_auc),
            ]);
        }

        let c = &self.cardiac;
        let e = &self.electrodermal;
        let t = &self.temperature;
        let m = &self.motion;
        cols.extend([
            ("hr_mean", c.hr_mean),
            ("ibi_sd", c.ibi_sd),
            ("ibi_mean", c.ibi_mean),
            ("ibi_min", c.ibi_min),
            ("ibi_max", c.ibi_max),
            ("hr_rmssd", c.hr_rmssd),
            ("hr_sd", c.hr_sd),
            ("hr_min", c.hr_min),
            ("hr_max", c.hr_max),
            ("hr_hf", c.hr_hf),
            ("hr_lf", c.hr_lf),
            ("hr_lfhf", c.hr_lfhf),
            ("sc_tonic_mean", e.tonic_mean),
            ("sc_tonic_std", e.tonic_std),
            ("sc_tonic_range", e.tonic_range),
            ("sc_phasic_mean", e.phasic_mean),
            ("sc_phasic_std", e.phasic_std),
            ("sc_phasic_range", e.phasic_range),
            ("sc_phasic_mag", e.phasic_magnitude),
            ("sc_phasic_dur", e.phasic_duration),
            ("sc_phasic_num", e.phasic_peaks),
            ("sc_phasic_auc", e.phasic_auc),
            ("temp_mean", t.mean),
            ("temp_median", t.median),
            ("temp_sd", t.sd),
            ("temp_slope", t.slope),
            ("acc_x", m.x_mean),
            ("acc_y", m.y_mean),
            ("acc_z", m.z_mean),
            ("acc_delta", m.delta_mean),
            ("acc_x_sd", m.x_sd),
            ("acc_y_sd", m.y_sd),
            ("acc_z_sd", m.z_sd),
            ("acc_delta_sd", m.delta_sd),
            ("ibi_based_quality", c.ibi_based_quality),
        ]);
        cols
    }

    /// Column names for a table of `kind` events.
    pub fn column_names(kind: EventKind) -> Vec<&'static str> {
        Self::empty(kind).columns().into_iter().map(|(n, _)| n).collect()
    }
}

/// Per-stream samples of one analysis window.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowStreams<'a> {
    pub eda: &'a [TimedSample],
    pub temp: &'a [TimedSample],
    pub ibi: &'a [TimedSample],
    pub hr: &'a [TimedSample],
    pub acc: &'a [TimedSample],
}

/// Features of one event plus the reasons any extractor came up empty.
#[derive(Debug, Clone)]
pub struct ExtractionReport {
    pub features: EventFeatures,
    pub issues: Vec<(Extractor, FeatureError)>,
}

/// Compute all features from one event's window.
pub fn compute_features(
    streams: &WindowStreams<'_>,
    kind: EventKind,
    settings: &ExtractionSettings,
) -> ExtractionReport {
    let mut features = EventFeatures::empty(kind);
    let mut issues = Vec::new();

    let (cardiac, spectral_issue) = spectral::extract_cardiac(streams.ibi, streams.hr, settings);
    features.cardiac = cardiac;
    if let Some(e) = spectral_issue {
        issues.push((Extractor::Spectral, e));
    }

    match electrodermal::gate(streams.eda, settings) {
        Ok(values) => {
            match ElectrodermalDecomposer::full_window().extract(&values) {
                Ok(f) => features.electrodermal = f,
                Err(e) => issues.push((Extractor::Electrodermal, e)),
            }

            if kind == EventKind::Sleep {
                let storm = crate::streams::scalar_values(leading_fraction(
                    streams.eda,
                    STORM_FRACTION,
                ));
                match ElectrodermalDecomposer::storm_window().extract_storm(&storm) {
                    Ok(f) => features.storm = Some(f),
                    Err(e) => issues.push((Extractor::Storm, e)),
                }
            }
        }
        Err(e) => issues.push((Extractor::Electrodermal, e)),
    }

    match summary::temperature_features(streams.temp, settings) {
        Ok(f) => features.temperature = f,
        Err(e) => issues.push((Extractor::Temperature, e)),
    }

    match summary::motion_features(streams.acc, settings) {
        Ok(f) => features.motion = f,
        Err(e) => issues.push((Extractor::Motion, e)),
    }

    ExtractionReport { features, issues }
}

/// Map a computed value to the missing marker when it is not finite.
pub(crate) fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}
