//! Tonic/phasic decomposition of skin conductance.
//!
//! A window of 4 Hz conductance samples is cleaned (spike removal, noise
//! gating, elliptic low-pass), deconvolved with a Bateman impulse response
//! into a sudomotor driver, and split into a slow tonic baseline and the
//! phasic remainder. The full sleep/wake window and the early "storm"
//! sub-window run the same pipeline with different low-pass cutoffs and
//! peak windows.

use crate::core::features::{
    finite, ElectrodermalFeatures, ExtractionSettings, FeatureError, StormFeatures,
};
use crate::core::filters::{self, EllipticLowpass};
use crate::core::summary::{nan_mean, nan_population_sd};
use crate::streams::{scalar_values, TimedSample};
use rustfft::{num_complex::Complex, FftPlanner};

/// Sampling rate of the conductance stream.
pub const SAMPLE_RATE: f64 = 4.0;

/// Peak detection sensitivity, µS.
pub const PEAK_DELTA: f64 = 0.02;

const DENOISE_THRESHOLD: f64 = 0.02;
const DENOISE_WINDOW_SECS: f64 = 2.0;
const STOP_EDGE_HZ: f64 = 1.1;
const BATEMAN_T1: f64 = 0.75;
const BATEMAN_T2: f64 = 2.0;
const DRIVER_SMOOTH_SECS: f64 = 1.6;
const BASELINE_GRID_SECS: f64 = 1.0;

/// Slope below which a driver sample counts as flat when bounding a peak.
const SLOPE_ZERO: f64 = 0.01;

/// Seconds searched before and after a peak for its onset and offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakWindow {
    pub pre_secs: f64,
    pub post_secs: f64,
}

impl PeakWindow {
    pub const fn new(pre_secs: f64, post_secs: f64) -> Self {
        Self { pre_secs, post_secs }
    }

    fn samples(&self, sample_rate: f64) -> (usize, usize) {
        (
            (self.pre_secs * sample_rate) as usize,
            (self.post_secs * sample_rate) as usize,
        )
    }
}

impl Default for PeakWindow {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Output of one decomposition.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub driver: Vec<f64>,
    pub tonic: Vec<f64>,
    pub phasic: Vec<f64>,
}

/// Conductance decomposition pipeline.
#[derive(Debug, Clone)]
pub struct ElectrodermalDecomposer {
    sample_rate: f64,
    lowpass_hz: f64,
    peak_window: PeakWindow,
}

impl ElectrodermalDecomposer {
    pub fn new(sample_rate: f64, lowpass_hz: f64, peak_window: PeakWindow) -> Self {
        Self {
            sample_rate,
            lowpass_hz,
            peak_window,
        }
    }

    /// Settings for a whole wake or sleep window.
    pub fn full_window() -> Self {
        Self::new(SAMPLE_RATE, 0.8, PeakWindow::new(1.0, 8.0))
    }

    /// Settings for the early sleep sub-window.
    pub fn storm_window() -> Self {
        Self::new(SAMPLE_RATE, 0.1, PeakWindow::default())
    }

    /// Run every stage on `values`.
    pub fn decompose(&self, values: &[f64]) -> Result<Decomposition, FeatureError> {
        let fs = self.sample_rate;

        let despiked = filters::remove_spikes(values, fs as usize);
        let denoised = filters::denoise(
            &despiked,
            DENOISE_THRESHOLD,
            (DENOISE_WINDOW_SECS * fs) as usize,
        );

        let lowpass = EllipticLowpass::design(self.lowpass_hz, STOP_EDGE_HZ, fs)
            .map_err(|e| failure("lowpass", e))?;
        let filtered = lowpass
            .filtfilt(&denoised)
            .map_err(|e| failure("lowpass", e))?;
        let cleaned = if filtered.iter().all(|v| v.is_finite()) {
            filtered
        } else {
            denoised
        };

        let driver = estimate_driver(&cleaned, fs)?;
        let tonic = estimate_tonic(&driver, fs)?;
        let phasic = driver.iter().zip(&tonic).map(|(d, t)| d - t).collect();

        Ok(Decomposition {
            driver,
            tonic,
            phasic,
        })
    }

    /// Full set of tonic and phasic features.
    pub fn extract(&self, values: &[f64]) -> Result<ElectrodermalFeatures, FeatureError> {
        let parts = self.decompose(values)?;
        let peaks = self.peak_stats(&parts.phasic);

        Ok(ElectrodermalFeatures {
            tonic_mean: finite(nan_mean(&parts.tonic)),
            tonic_std: finite(nan_population_sd(&parts.tonic)),
            tonic_range: finite(nan_range(&parts.tonic)),
            phasic_mean: finite(nan_mean(&parts.phasic)),
            phasic_std: finite(nan_population_sd(&parts.phasic)),
            phasic_range: finite(nan_range(&parts.phasic)),
            phasic_magnitude: peaks.magnitude,
            phasic_duration: peaks.duration,
            phasic_peaks: Some(peaks.count as f64),
            phasic_auc: finite(area_under_curve(&parts.phasic, self.sample_rate)),
        })
    }

    /// Abbreviated features for the storm sub-window.
    pub fn extract_storm(&self, values: &[f64]) -> Result<StormFeatures, FeatureError> {
        let parts = self.decompose(values)?;
        let peaks = self.peak_stats(&parts.phasic);

        Ok(StormFeatures {
            tonic_mean: finite(nan_mean(&parts.tonic)),
            phasic_mean: finite(nan_mean(&parts.phasic)),
            phasic_magnitude: peaks.magnitude,
            phasic_duration: peaks.duration,
            phasic_peaks: Some(peaks.count as f64),
            phasic_auc: finite(area_under_curve(&parts.phasic, self.sample_rate)),
        })
    }

    fn peak_stats(&self, phasic: &[f64]) -> PeakStats {
        let (pre, post) = self.peak_window.samples(self.sample_rate);
        let maxima = peak_maxima(phasic, PEAK_DELTA);
        let bounds = peak_bounds(phasic, &maxima, pre, post);

        let mut magnitudes = Vec::new();
        let mut durations = Vec::new();
        for (&peak, bound) in maxima.iter().zip(&bounds) {
            if let Some((start, stop)) = *bound {
                magnitudes.push(phasic[peak] - phasic[start]);
                durations.push((stop - start) as f64 / self.sample_rate);
            }
        }

        PeakStats {
            count: maxima.len(),
            magnitude: finite(nan_mean(&magnitudes)),
            duration: finite(nan_mean(&durations)),
        }
    }
}

struct PeakStats {
    count: usize,
    magnitude: Option<f64>,
    duration: Option<f64>,
}

fn failure(stage: &'static str, reason: impl ToString) -> FeatureError {
    FeatureError::DecompositionFailure {
        stage,
        reason: reason.to_string(),
    }
}

/// Check the conductance gate and return the window's values.
pub fn gate(eda: &[TimedSample], settings: &ExtractionSettings) -> Result<Vec<f64>, FeatureError> {
    if eda.len() <= settings.eda_min_samples {
        return Err(FeatureError::InsufficientWindow {
            samples: eda.len(),
            required: settings.eda_min_samples,
        });
    }

    let values = scalar_values(eda);
    let mean = nan_mean(&values);
    if mean.is_nan() || mean <= settings.eda_min_mean {
        return Err(FeatureError::LowSignal {
            mean,
            floor: settings.eda_min_mean,
        });
    }
    Ok(values)
}

/// Bateman impulse response sampled at `sample_rate`.
pub fn bateman(sample_rate: f64) -> Vec<f64> {
    let t1 = BATEMAN_T1 * sample_rate;
    let t2 = BATEMAN_T2 * sample_rate;
    let len = (t2 * 10.0) as usize;

    let curve: Vec<f64> = (0..len)
        .map(|i| {
            let i = i as f64;
            (-i / t2).exp() - (-i / t1).exp()
        })
        .collect();
    let total: f64 = curve.iter().sum();
    curve.into_iter().map(|v| sample_rate * v / total).collect()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

/// Min-max rescale `curve` onto `[0, level]`.
fn rescale(curve: &[f64], level: f64) -> Vec<f64> {
    let lo = curve.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = curve.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    curve.iter().map(|v| level * (v - lo) / (hi - lo)).collect()
}

/// Deconvolve `signal` by the unit-sum version of `irf` in the frequency
/// domain and take the magnitude.
pub fn deconvolve(signal: &[f64], irf: &[f64]) -> Vec<f64> {
    let len = signal.len();
    if len == 0 {
        return Vec::new();
    }
    let total: f64 = irf.iter().sum();

    let mut spectrum: Vec<Complex<f64>> = signal.iter().map(|&v| Complex::new(v, 0.0)).collect();
    let mut response = vec![Complex::new(0.0, 0.0); len];
    for (slot, &v) in response.iter_mut().zip(irf) {
        *slot = Complex::new(v / total, 0.0);
    }

    let mut planner = FftPlanner::new();
    let forward = planner.plan_fft_forward(len);
    forward.process(&mut spectrum);
    forward.process(&mut response);

    let mut quotient: Vec<Complex<f64>> = spectrum
        .iter()
        .zip(&response)
        .map(|(&s, &r)| s / r)
        .collect();
    planner.plan_fft_inverse(len).process(&mut quotient);

    quotient.iter().map(|c| c.norm() / len as f64).collect()
}

/// Sudomotor driver of a cleaned conductance window.
///
/// The window is padded with rescaled halves of the impulse response so
/// the deconvolution does not start or end on a spurious peak. The result
/// is one sample shorter than the input.
pub fn estimate_driver(signal: &[f64], sample_rate: f64) -> Result<Vec<f64>, FeatureError> {
    let (Some(&first), Some(&last)) = (signal.first(), signal.last()) else {
        return Err(failure("driver", "empty signal"));
    };

    let irf = bateman(sample_rate);
    let peak = argmax(&irf);

    let mut padded = rescale(&irf[..=peak], first);
    padded.extend_from_slice(signal);
    padded.extend(rescale(&irf[peak..], last));

    let deconvolved = deconvolve(&padded, &irf);
    let driver = &deconvolved[peak + 1..peak + signal.len()];

    let width = (DRIVER_SMOOTH_SECS * sample_rate).round() as usize;
    let driver = filters::smooth(driver, &filters::gaussian(width, width as f64 / 8.0));

    if driver.is_empty() || driver.iter().any(|v| !v.is_finite()) {
        return Err(failure("driver", "deconvolution produced non-finite values"));
    }
    Ok(driver)
}

/// Tonic baseline: peaks replaced by straight segments, sampled on a
/// one-second grid and interpolated with a natural cubic spline.
pub fn estimate_tonic(driver: &[f64], sample_rate: f64) -> Result<Vec<f64>, FeatureError> {
    if driver.len() < 2 {
        return Err(failure("phasic", "driver shorter than two samples"));
    }

    let reach = (2.0 * sample_rate) as usize;
    let maxima = peak_maxima(driver, PEAK_DELTA);
    let bounds = peak_bounds(driver, &maxima, reach, reach);

    let mut flattened = driver.to_vec();
    for &(start, stop) in bounds.iter().flatten().filter(|(start, stop)| stop > start) {
        let span = stop - start;
        let slope = (driver[stop] - driver[start]) / span as f64;
        for k in 0..span {
            flattened[start + k] = driver[start] + k as f64 * slope;
        }
    }

    let last = driver.len() - 1;
    let step = ((BASELINE_GRID_SECS * sample_rate) as usize).max(1);
    let mut grid: Vec<usize> = (0..last).step_by(step).collect();
    grid.push(last);

    let xs: Vec<f64> = grid.iter().map(|&i| i as f64).collect();
    let ys: Vec<f64> = grid.iter().map(|&i| flattened[i]).collect();
    let at: Vec<f64> = (0..driver.len()).map(|i| i as f64).collect();
    Ok(natural_spline(&xs, &ys, &at))
}

/// Indices of local maxima that rise at least `delta` above the
/// surrounding minima.
pub fn peak_maxima(values: &[f64], delta: f64) -> Vec<usize> {
    let mut maxima = Vec::new();
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    let mut hi_pos = 0;
    let mut looking_for_max = true;

    for (i, &v) in values.iter().enumerate() {
        if v > hi {
            hi = v;
            hi_pos = i;
        }
        if v < lo {
            lo = v;
        }

        if looking_for_max {
            if v < hi - delta {
                maxima.push(hi_pos);
                lo = v;
                looking_for_max = false;
            }
        } else if v > lo + delta {
            hi = v;
            hi_pos = i;
            looking_for_max = true;
        }
    }
    maxima
}

/// Onset and offset of each peak.
///
/// The onset is found by walking back from the peak while the signal is
/// rising or flat; the offset by walking forward while it is falling or
/// flat. A slope within `SLOPE_ZERO` of zero counts as flat. Peaks with
/// fewer than `pre` samples before them or `post` slopes after them get
/// `None`.
pub fn peak_bounds(
    values: &[f64],
    peaks: &[usize],
    pre: usize,
    post: usize,
) -> Vec<Option<(usize, usize)>> {
    let slopes: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    let rising = |s: f64| s > 0.0 || s.abs() <= SLOPE_ZERO;
    let falling = |s: f64| s < 0.0 || s.abs() <= SLOPE_ZERO;

    peaks
        .iter()
        .map(|&peak| {
            if pre == 0 || post == 0 || peak < pre || peak + post > slopes.len() {
                return None;
            }

            let from = peak - pre;
            let before = &slopes[from..peak];
            let mut i = before.len();
            while i > 0 && rising(before[i - 1]) {
                i -= 1;
            }

            let after = &slopes[peak..peak + post];
            let mut j = 0;
            while j < after.len() && falling(after[j]) {
                j += 1;
            }

            Some((from + i, peak + j))
        })
        .collect()
}

/// Evaluate the natural cubic spline through `(xs, ys)` at `at`.
/// `xs` must be strictly increasing.
pub fn natural_spline(xs: &[f64], ys: &[f64], at: &[f64]) -> Vec<f64> {
    let n = xs.len();
    if n == 0 {
        return vec![f64::NAN; at.len()];
    }
    if n == 1 {
        return vec![ys[0]; at.len()];
    }

    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();

    // Second derivatives, zero at both ends.
    let mut m = vec![0.0; n];
    if n > 2 {
        let inner = n - 2;
        let mut diag = vec![0.0; inner];
        let mut rhs = vec![0.0; inner];
        for k in 0..inner {
            let i = k + 1;
            diag[k] = 2.0 * (h[i - 1] + h[i]);
            rhs[k] = 6.0 * ((ys[i + 1] - ys[i]) / h[i] - (ys[i] - ys[i - 1]) / h[i - 1]);
        }
        for k in 1..inner {
            let w = h[k] / diag[k - 1];
            diag[k] -= w * h[k];
            rhs[k] -= w * rhs[k - 1];
        }
        m[inner] = rhs[inner - 1] / diag[inner - 1];
        for k in (0..inner - 1).rev() {
            m[k + 1] = (rhs[k] - h[k + 1] * m[k + 2]) / diag[k];
        }
    }

    at.iter()
        .map(|&x| {
            let seg = xs.partition_point(|&v| v <= x).clamp(1, n - 1) - 1;
            let (x0, x1) = (xs[seg], xs[seg + 1]);
            let hs = h[seg];
            let a = (x1 - x) / hs;
            let b = (x - x0) / hs;
            a * ys[seg]
                + b * ys[seg + 1]
                + ((a.powi(3) - a) * m[seg] + (b.powi(3) - b) * m[seg + 1]) * hs * hs / 6.0
        })
        .collect()
}

fn nan_range(values: &[f64]) -> f64 {
    let (lo, hi) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    hi - lo
}

/// Area under the curve in value-seconds.
pub fn area_under_curve(values: &[f64], sample_rate: f64) -> f64 {
    values.iter().sum::<f64>() / sample_rate
}
