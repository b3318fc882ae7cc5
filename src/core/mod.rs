//! Feature extraction for self-report events.
//!
//! This module contains:
//! - Analysis windows around wake and sleep reports
//! - Heart-rate variability, skin conductance, temperature and movement extractors
//! - The feature record and its assembly
//! - Reading report tables and writing feature tables

pub mod electrodermal;
pub mod features;
pub mod filters;
pub mod report;
pub mod spectral;
pub mod summary;
pub mod windowing;

// Re-export commonly used types
pub use electrodermal::{Decomposition, ElectrodermalDecomposer, PeakWindow};
pub use features::{
    compute_features, CardiacFeatures, ElectrodermalFeatures, EventFeatures, ExtractionReport,
    ExtractionSettings, Extractor, FeatureError, MotionFeatures, StormFeatures,
    TemperatureFeatures, WindowStreams,
};
pub use report::{features_path, ReportColumns, ReportError, ReportTable, SurveyClock};
pub use windowing::{
    leading_fraction, select, AnalysisWindow, EventKind, EventTiming, ReportEvent, WindowPolicy,
};
