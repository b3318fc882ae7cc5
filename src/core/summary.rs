//! Temperature and movement summaries.

use crate::core::features::{
    finite, ExtractionSettings, FeatureError, MotionFeatures, TemperatureFeatures,
};
use crate::streams::{axis_values, scalar_values, TimedSample};
use statrs::statistics::{Data, Median, Statistics};

/// Samples averaged by the movement smoother (one second at 32 Hz).
pub const MOTION_SMOOTHING: usize = 32;

/// Mean over the non-NaN values; NaN when there are none.
pub(crate) fn nan_mean(values: &[f64]) -> f64 {
    values.iter().filter(|v| !v.is_nan()).mean()
}

/// Population standard deviation over the non-NaN values.
pub(crate) fn nan_population_sd(values: &[f64]) -> f64 {
    values.iter().filter(|v| !v.is_nan()).population_std_dev()
}

/// Least-squares slope of `values` against their index.
pub fn index_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;

    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, &y)| {
            let dx = i as f64 - x_mean;
            (num + dx * (y - y_mean), den + dx * dx)
        });
    num / den
}

/// Skin temperature features. Needs more than `temp_min_samples` samples.
pub fn temperature_features(
    temp: &[TimedSample],
    settings: &ExtractionSettings,
) -> Result<TemperatureFeatures, FeatureError> {
    if temp.len() <= settings.temp_min_samples {
        return Err(FeatureError::InsufficientWindow {
            samples: temp.len(),
            required: settings.temp_min_samples,
        });
    }

    let values = scalar_values(temp);
    let present: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();

    Ok(TemperatureFeatures {
        mean: finite(present.iter().mean()),
        median: finite(Data::new(present.clone()).median()),
        sd: finite(present.iter().std_dev()),
        slope: finite(index_slope(&values)),
    })
}

/// `|v[i] - v[i+1]|` for every sample; the last entry has no successor and
/// is NaN.
pub fn differenced_axis(values: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = values.windows(2).map(|w| (w[0] - w[1]).abs()).collect();
    if !values.is_empty() {
        out.push(f64::NAN);
    }
    out
}

/// Moving average over complete windows only, `window - 1` shorter than
/// the input. A window containing NaN averages to NaN.
pub fn moving_average_valid(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 {
        return Vec::new();
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

/// Movement features from the three acceleration axes. Needs more than
/// `acc_min_samples` samples.
pub fn motion_features(
    acc: &[TimedSample],
    settings: &ExtractionSettings,
) -> Result<MotionFeatures, FeatureError> {
    if acc.len() <= settings.acc_min_samples {
        return Err(FeatureError::InsufficientWindow {
            samples: acc.len(),
            required: settings.acc_min_samples,
        });
    }

    let [dx, dy, dz] = [0, 1, 2].map(|axis| differenced_axis(&axis_values(acc, axis)));
    let magnitude: Vec<f64> = dx
        .iter()
        .zip(&dy)
        .zip(&dz)
        .map(|((x, y), z)| (x * x + y * y + z * z).sqrt())
        .collect();
    let smoothed = moving_average_valid(&magnitude, MOTION_SMOOTHING);

    Ok(MotionFeatures {
        x_mean: finite(nan_mean(&dx)),
        y_mean: finite(nan_mean(&dy)),
        z_mean: finite(nan_mean(&dz)),
        delta_mean: finite(nan_mean(&smoothed)),
        x_sd: finite(nan_population_sd(&dx)),
        y_sd: finite(nan_population_sd(&dy)),
        z_sd: finite(nan_population_sd(&dz)),
        delta_sd: finite(nan_population_sd(&smoothed)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::types::instant_from_epoch;

    fn scalar_series(values: &[f64]) -> Vec<TimedSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| TimedSample::scalar(instant_from_epoch(i as f64).unwrap(), v))
            .collect()
    }

    fn acc_series(count: usize, f: impl Fn(usize) -> [f64; 3]) -> Vec<TimedSample> {
        (0..count)
            .map(|i| TimedSample::triaxial(instant_from_epoch(i as f64 / 32.0).unwrap(), f(i)))
            .collect()
    }

    #[test]
    fn test_temperature_features() {
        let values: Vec<f64> = (0..12).map(|i| 30.0 + 0.5 * i as f64).collect();
        let features =
            temperature_features(&scalar_series(&values), &ExtractionSettings::default()).unwrap();

        assert!((features.mean.unwrap() - 32.75).abs() < 1e-9);
        assert!((features.median.unwrap() - 32.75).abs() < 1e-9);
        assert!((features.slope.unwrap() - 0.5).abs() < 1e-9);
        // sample standard deviation of 0.5 * (0..12)
        let expected_sd = 0.5 * (13.0f64).sqrt();
        assert!((features.sd.unwrap() - expected_sd).abs() < 1e-9);
    }

    #[test]
    fn test_temperature_gate() {
        let err = temperature_features(&scalar_series(&[30.0; 10]), &ExtractionSettings::default())
            .unwrap_err();
        assert_eq!(
            err,
            FeatureError::InsufficientWindow {
                samples: 10,
                required: 10
            }
        );
    }

    #[test]
    fn test_differenced_axis() {
        let d = differenced_axis(&[1.0, 3.0, 2.0]);
        assert_eq!(&d[..2], &[2.0, 1.0]);
        assert!(d[2].is_nan());
        assert!(differenced_axis(&[]).is_empty());
    }

    #[test]
    fn test_moving_average_valid() {
        let out = moving_average_valid(&[1.0, 2.0, 3.0, 4.0], 2);
        assert_eq!(out, vec![1.5, 2.5, 3.5]);
        assert!(moving_average_valid(&[1.0; 10], 32).is_empty());
    }

    #[test]
    fn test_constant_acceleration() {
        let acc = acc_series(40, |_| [12.0, -3.0, 60.0]);
        let features = motion_features(&acc, &ExtractionSettings::default()).unwrap();

        assert_eq!(features.x_mean, Some(0.0));
        assert_eq!(features.x_sd, Some(0.0));
        assert_eq!(features.delta_mean, Some(0.0));
        assert_eq!(features.delta_sd, Some(0.0));

        let magnitude = differenced_axis(&[0.0; 40]);
        assert_eq!(moving_average_valid(&magnitude, MOTION_SMOOTHING).len(), 9);
    }

    #[test]
    fn test_moving_axis() {
        let acc = acc_series(64, |i| [i as f64, 0.0, 0.0]);
        let features = motion_features(&acc, &ExtractionSettings::default()).unwrap();

        assert_eq!(features.x_mean, Some(1.0));
        assert_eq!(features.y_mean, Some(0.0));
        assert_eq!(features.delta_mean, Some(1.0));
        assert_eq!(features.delta_sd, Some(0.0));
    }

    #[test]
    fn test_motion_gate() {
        let acc = acc_series(20, |_| [0.0; 3]);
        assert!(motion_features(&acc, &ExtractionSettings::default()).is_err());
    }
}
