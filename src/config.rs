//! Configuration for the wearable feature pipeline.

use crate::core::features::ExtractionSettings;
use crate::core::report::{ReportColumns, SurveyClock};
use crate::core::windowing::WindowPolicy;
use crate::streams::StudyLayout;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the study tree: `<subject>/<session_type>/<session>/<KIND>.csv`
    pub data_root: PathBuf,

    /// Session types recorded per subject
    pub session_types: Vec<String>,

    /// Where feature tables are written
    pub output_dir: PathBuf,

    /// Path for run statistics
    pub data_path: PathBuf,

    /// IANA zone the survey timestamps were recorded in
    pub survey_timezone: String,

    /// chrono format of the survey timestamps
    pub survey_time_format: String,

    /// Report table column names
    pub columns: ReportColumns,

    /// Text written for a missing feature
    pub missing_marker: String,

    /// Extractor thresholds
    pub gates: ExtractionSettings,

    /// Wake window placement
    pub window: WindowPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wearable-features");

        Self {
            data_root: PathBuf::from("."),
            session_types: vec!["control".to_string(), "stress".to_string()],
            output_dir: data_dir.join("features"),
            data_path: data_dir,
            survey_timezone: "UTC".to_string(),
            survey_time_format: "%Y-%m-%d %H:%M:%S".to_string(),
            columns: ReportColumns::default(),
            missing_marker: String::new(),
            gates: ExtractionSettings::default(),
            window: WindowPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
        config.survey_zone()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wearable-features")
            .join("config.json")
    }

    /// Ensure all output directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    pub fn survey_zone(&self) -> Result<Tz, ConfigError> {
        self.survey_timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.survey_timezone.clone()))
    }

    /// Timestamp parser for report tables.
    pub fn survey_clock(&self) -> Result<SurveyClock, ConfigError> {
        Ok(SurveyClock::new(
            self.survey_zone()?,
            self.survey_time_format.clone(),
        ))
    }

    pub fn layout(&self) -> StudyLayout {
        StudyLayout::new(&self.data_root)
    }

    /// File holding persisted run statistics.
    pub fn run_stats_path(&self) -> PathBuf {
        self.data_path.join("run_stats.json")
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("unknown time zone {0:?}")]
    InvalidTimezone(String),
}

/// Serde support for Duration, as whole seconds.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
