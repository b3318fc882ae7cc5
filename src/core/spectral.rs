//! Heart-rate variability features from interbeat intervals.
//!
//! The irregular interbeat series is binned onto a 4 Hz grid, windowed with
//! a unit-sum Hann taper and transformed; low and high frequency power are
//! summed over fixed bands. Time-domain interbeat and heart-rate statistics
//! are computed whenever the window holds samples, independent of the
//! spectral gate.

use crate::core::features::{finite, CardiacFeatures, ExtractionSettings, FeatureError};
use crate::streams::{scalar_values, TimedSample};
use rustfft::{num_complex::Complex, FftPlanner};
use statrs::statistics::Statistics;

/// Rate of the uniform grid the interbeat series is resampled onto.
pub const RESAMPLE_HZ: f64 = 4.0;

/// Width of one resampling bin.
const BIN_MICROS: i64 = 250_000;

/// Low-frequency band, Hz.
pub const LF_BAND: (f64, f64) = (0.05, 0.15);

/// High-frequency band, Hz.
pub const HF_BAND: (f64, f64) = (0.15, 0.4);

/// Summed spectral power in the two bands.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPowers {
    pub lf: f64,
    pub hf: f64,
}

impl BandPowers {
    /// LF/HF ratio; missing when the high band holds no power.
    pub fn ratio(&self) -> Option<f64> {
        if self.hf == 0.0 {
            return None;
        }
        finite(self.lf / self.hf)
    }
}

/// Mean-aggregate samples into 250 ms bins spanning the first to the last
/// sample. Empty bins take the value of the nearest filled bin, the earlier
/// one on ties.
pub fn resample_uniform(samples: &[TimedSample]) -> Vec<f64> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };

    let bin_of = |s: &TimedSample| s.timestamp.timestamp_micros().div_euclid(BIN_MICROS);
    let origin = bin_of(first);
    let len = (bin_of(last) - origin + 1) as usize;

    let mut sums = vec![0.0; len];
    let mut counts = vec![0usize; len];
    for sample in samples {
        let idx = (bin_of(sample) - origin) as usize;
        sums[idx] += sample.value.scalar().unwrap_or(f64::NAN);
        counts[idx] += 1;
    }

    let bins: Vec<Option<f64>> = sums
        .iter()
        .zip(&counts)
        .map(|(&sum, &count)| (count > 0).then(|| sum / count as f64))
        .collect();

    fill_nearest(&bins)
}

fn fill_nearest(bins: &[Option<f64>]) -> Vec<f64> {
    let prev: Vec<Option<usize>> = bins
        .iter()
        .enumerate()
        .scan(None, |seen, (i, bin)| {
            if bin.is_some() {
                *seen = Some(i);
            }
            Some(*seen)
        })
        .collect();

    let mut next: Vec<Option<usize>> = bins
        .iter()
        .enumerate()
        .rev()
        .scan(None, |seen, (i, bin)| {
            if bin.is_some() {
                *seen = Some(i);
            }
            Some(*seen)
        })
        .collect();
    next.reverse();

    bins.iter()
        .zip(prev.iter().zip(&next))
        .enumerate()
        .map(|(i, (bin, (&p, &q)))| {
            if let Some(v) = *bin {
                return v;
            }
            let source = match (p, q) {
                (Some(p), Some(q)) => {
                    if i - p <= q - i {
                        p
                    } else {
                        q
                    }
                }
                (Some(p), None) => p,
                (None, Some(q)) => q,
                (None, None) => return f64::NAN,
            };
            bins[source].unwrap_or(f64::NAN)
        })
        .collect()
}

/// Hann taper normalised to unit sum.
pub fn unit_hann(len: usize) -> Vec<f64> {
    if len == 1 {
        return vec![1.0];
    }
    let span = (len - 1) as f64;
    let window: Vec<f64> = (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * n as f64 / span).cos())
        .collect();
    let total: f64 = window.iter().sum();
    window.into_iter().map(|w| w / total).collect()
}

/// Power (squared magnitude) of the full DFT of a tapered series.
pub fn power_spectrum(series: &[f64]) -> Vec<f64> {
    if series.is_empty() {
        return Vec::new();
    }

    let taper = unit_hann(series.len());
    let mut buffer: Vec<Complex<f64>> = series
        .iter()
        .zip(&taper)
        .map(|(&x, &w)| Complex::new(x * w, 0.0))
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(buffer.len());
    fft.process(&mut buffer);

    buffer.iter().map(|c| c.norm_sqr()).collect()
}

/// Sum power over the bins of `[low, high)` Hz for a grid of `n` points.
pub fn band_power(power: &[f64], band: (f64, f64), n: usize) -> f64 {
    let resolution = RESAMPLE_HZ / n as f64;
    let start = ((band.0 / resolution).round_ties_even() as usize).min(power.len());
    let stop = ((band.1 / resolution).round_ties_even() as usize).min(power.len());
    if start >= stop {
        return 0.0;
    }
    power[start..stop].iter().sum()
}

/// LF and HF power of an interbeat window.
pub fn band_powers(ibi: &[TimedSample]) -> BandPowers {
    let grid = resample_uniform(ibi);
    let power = power_spectrum(&grid);
    BandPowers {
        lf: band_power(&power, LF_BAND, grid.len()),
        hf: band_power(&power, HF_BAND, grid.len()),
    }
}

/// Root mean square of successive differences; needs two samples.
pub fn rmssd(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean_sq = values
        .windows(2)
        .map(|w| (w[1] - w[0]).powi(2))
        .sum::<f64>()
        / (values.len() - 1) as f64;
    finite(mean_sq.sqrt())
}

/// All cardiac features of one window.
///
/// Returns the gate reason alongside the features when the spectral part
/// was skipped.
pub fn extract_cardiac(
    ibi: &[TimedSample],
    hr: &[TimedSample],
    settings: &ExtractionSettings,
) -> (CardiacFeatures, Option<FeatureError>) {
    let mut features = CardiacFeatures::default();

    let ibi_ms = scalar_values(ibi);
    if !ibi_ms.is_empty() {
        features.ibi_mean = finite(ibi_ms.iter().mean());
        features.ibi_sd = finite(ibi_ms.iter().population_std_dev());
        features.ibi_min = finite(Statistics::min(ibi_ms.iter()));
        features.ibi_max = finite(Statistics::max(ibi_ms.iter()));
        features.hr_rmssd = rmssd(&ibi_ms);

        let covered_secs = ibi_ms.iter().sum::<f64>() / 1000.0;
        features.ibi_based_quality = finite(covered_secs / settings.quality_nominal_secs);
    }

    let hr_bpm = scalar_values(hr);
    if !hr_bpm.is_empty() {
        features.hr_mean = finite(hr_bpm.iter().mean());
        features.hr_sd = finite(hr_bpm.iter().population_std_dev());
        features.hr_min = finite(Statistics::min(hr_bpm.iter()));
        features.hr_max = finite(Statistics::max(hr_bpm.iter()));
    }

    if ibi.len() <= settings.spectral_min_ibi {
        let gate = FeatureError::InsufficientWindow {
            samples: ibi.len(),
            required: settings.spectral_min_ibi,
        };
        return (features, Some(gate));
    }

    let bands = band_powers(ibi);
    features.hr_lf = finite(bands.lf);
    features.hr_hf = finite(bands.hf);
    features.hr_lfhf = bands.ratio();

    (features, None)
}
