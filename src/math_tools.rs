//! This module provides the numerical helpers shared by the filters: FFT padding, the
//! Gaussian point-source kernel, profile index mapping and robust statistics.

use num_traits::Float;
use std::f64::consts::PI;

/// Ratio of the full width at half maximum to the standard deviation of a Gaussian.
pub const SIGMAS_IN_FWHM: f64 = 2.354_820_045_030_949_3;

/// Smallest power of two that holds `n` samples (at least 2).
pub fn pow2_ceil(n: usize) -> usize {
    n.max(2).next_power_of_two()
}

/// Replaces NaN and infinities with zero.
pub fn finite_or_zero<T: Float>(value: T) -> T {
    if value.is_finite() {
        value
    } else {
        T::zero()
    }
}

/// Nearest-index mapping of frequency bin `bin` (of `nf + 1` bins) onto a profile of `len`
/// entries sampled uniformly from zero to Nyquist.
///
/// # Returns
/// `round(bin / (nf + 1) * len)`, clamped to the last profile index.
pub fn profile_index(bin: usize, nf: usize, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let index = (bin as f64 / (nf + 1) as f64 * len as f64).round() as usize;
    index.min(len - 1)
}

/// Relative amplitude at frequency `f` (Hz) of the spectrum of a Gaussian pulse with the
/// given full width at half maximum in time (s).
///
/// An undefined or non-positive width yields a flat spectrum.
pub fn gaussian_response(f: f64, fwhm_time: f64) -> f64 {
    if !fwhm_time.is_finite() || fwhm_time <= 0.0 {
        return 1.0;
    }
    let sigma_t = fwhm_time / SIGMAS_IN_FWHM;
    let sigma_f = 1.0 / (2.0 * PI * sigma_t);
    (-0.5 * (f / sigma_f).powi(2)).exp()
}

/// Median of the values. The slice is reordered in place.
///
/// # Returns
/// `None` for an empty slice.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some(0.5 * (values[mid - 1] + values[mid]))
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pow2_ceil() {
        assert_eq!(pow2_ceil(0), 2);
        assert_eq!(pow2_ceil(256), 256);
        assert_eq!(pow2_ceil(257), 512);
        assert_eq!(pow2_ceil(1000), 1024);
    }

    #[test]
    fn test_profile_index_maps_nearest_and_clamps() {
        // 129 bins onto 4 entries
        assert_eq!(profile_index(0, 128, 4), 0);
        assert_eq!(profile_index(16, 128, 4), 0);
        assert_eq!(profile_index(17, 128, 4), 1);
        assert_eq!(profile_index(128, 128, 4), 3);
        assert_eq!(profile_index(5, 128, 0), 0);
    }

    #[test]
    fn test_gaussian_response_half_maximum() {
        assert_relative_eq!(gaussian_response(0.0, 0.1), 1.0);
        assert_eq!(gaussian_response(3.0, f64::NAN), 1.0);
        // The transform of a Gaussian is a Gaussian of FWHM 4 ln2 / (pi * fwhm_time).
        let fwhm_f = 4.0 * 2.0f64.ln() / (PI * 0.1);
        assert_relative_eq!(gaussian_response(0.5 * fwhm_f, 0.1), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut []), None);
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_finite_or_zero() {
        assert_eq!(finite_or_zero(f32::NAN), 0.0);
        assert_eq!(finite_or_zero(f64::INFINITY), 0.0);
        assert_eq!(finite_or_zero(1.5f32), 1.5);
    }
}
