//! Analysis windows around self-report events.
//!
//! Wake reports are analysed over a fixed span ending shortly before the
//! survey was completed; sleep reports over the reported sleep interval.
//! Window bounds are exclusive on both ends: a sample stamped exactly at the
//! window start or end is not part of the window.

use crate::streams::TimedSample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Which survey an event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Wake,
    Sleep,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Wake => f.write_str("wake"),
            EventKind::Sleep => f.write_str("sleep"),
        }
    }
}

/// Timestamps carried by a report event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTiming {
    /// Survey completion instant (wake reports)
    Completion(DateTime<Utc>),
    /// Reported sleep onset and offset
    Interval {
        onset: DateTime<Utc>,
        offset: DateTime<Utc>,
    },
}

/// One self-report row.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEvent {
    /// Position of the row in the input table
    pub row: usize,
    pub subject_id: String,
    pub kind: EventKind,
    /// `None` when the row's timestamps could not be parsed
    pub timing: Option<EventTiming>,
}

/// Offsets used to place a wake window before survey completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowPolicy {
    /// Window start, measured back from completion
    #[serde(with = "crate::config::duration_serde")]
    pub wake_lead: std::time::Duration,
    /// Window end, measured back from completion
    #[serde(with = "crate::config::duration_serde")]
    pub wake_lag: std::time::Duration,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            wake_lead: std::time::Duration::from_secs(13 * 60),
            wake_lag: std::time::Duration::from_secs(3 * 60),
        }
    }
}

/// A time range over which features are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AnalysisWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Derive the window of a report event, if it carries usable timestamps.
    pub fn for_event(event: &ReportEvent, policy: &WindowPolicy) -> Option<Self> {
        match event.timing? {
            EventTiming::Completion(done) => Some(Self::new(
                done - to_chrono(policy.wake_lead),
                done - to_chrono(policy.wake_lag),
            )),
            EventTiming::Interval { onset, offset } => Some(Self::new(onset, offset)),
        }
    }

    /// Check if a timestamp falls strictly inside this window.
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp > self.start && timestamp < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Get the duration of this window in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 1000.0
    }
}

fn to_chrono(d: std::time::Duration) -> Duration {
    Duration::milliseconds(d.as_millis() as i64)
}

/// Slice the samples of a sorted stream that fall inside `window`.
///
/// An empty stream, or a window with `end <= start`, gives an empty slice.
pub fn select<'a>(samples: &'a [TimedSample], window: &AnalysisWindow) -> &'a [TimedSample] {
    let lo = samples.partition_point(|s| s.timestamp <= window.start);
    let hi = samples.partition_point(|s| s.timestamp < window.end);
    if hi <= lo {
        return &[];
    }
    &samples[lo..hi]
}

/// Leading part of a window's samples covering `fraction` of the sample count.
///
/// The cut point is the timestamp of the sample at index
/// `round(fraction * n)`; samples stamped before it are kept.
pub fn leading_fraction(samples: &[TimedSample], fraction: f64) -> &[TimedSample] {
    let cut = (samples.len() as f64 * fraction).round_ties_even() as usize;
    if cut >= samples.len() {
        return samples;
    }
    let cutoff = samples[cut].timestamp;
    let end = samples.partition_point(|s| s.timestamp < cutoff);
    &samples[..end]
}
