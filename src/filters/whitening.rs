//! Spectral whitening: flattens frequency windows that stand out above the typical noise
//! level of a channel, such as resonances or pickup lines of unknown frequency.

use crate::config::FilterSettings;
use crate::error::{FilterError, FilterResult};
use crate::filters::core::FilterCore;
use crate::filters::dynamic::{DynamicFilter, ProfileSource};
use crate::math_tools::median;
use realfft::num_complex::Complex32;

/// A dynamic filter shaping each channel by [`SpectralWhitening`].
pub type WhiteningFilter = DynamicFilter<SpectralWhitening>;

/// Measures the amplitude spectrum of a channel in windows of `window` bins above the
/// high-pass cutoff. Windows whose RMS amplitude exceeds `level` times the median RMS are
/// scaled down to that level.
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralWhitening {
    level: f64,
    window: usize,
}

impl SpectralWhitening {
    pub fn new(level: f64, window: usize) -> FilterResult<Self> {
        if !(level.is_finite() && level > 0.0) {
            return Err(FilterError::InvalidParameter(format!(
                "whitening level must be positive, got {level}"
            )));
        }
        if window == 0 {
            return Err(FilterError::InvalidParameter(
                "whitening window must hold at least one bin".to_string(),
            ));
        }
        Ok(SpectralWhitening { level, window })
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl ProfileSource for SpectralWhitening {
    const NAME: &'static str = "whitening";
    const ID: &'static str = "wh";

    fn from_settings(settings: &FilterSettings) -> FilterResult<Self> {
        SpectralWhitening::new(settings.whiten.level, settings.whiten.window)
    }

    fn incremental_profile(
        &mut self,
        core: &FilterCore,
        channel: usize,
        spectrum: &[Complex32],
    ) -> Option<Vec<f32>> {
        let nf = core.nf().min(spectrum.len().saturating_sub(1));
        let start = core.min_index().min(nf);

        let windows: Vec<(usize, usize, f64)> = (start..=nf)
            .step_by(self.window)
            .map(|from| {
                let to = (from + self.window).min(nf + 1);
                let power: f64 = spectrum[from..to]
                    .iter()
                    .map(|x| x.norm_sqr() as f64)
                    .sum();
                (from, to, (power / (to - from) as f64).sqrt())
            })
            .collect();

        let mut levels: Vec<f64> = windows
            .iter()
            .map(|(_, _, rms)| *rms)
            .filter(|rms| rms.is_finite() && *rms > 0.0)
            .collect();
        let Some(median) = median(&mut levels) else {
            log::warn!("channel {channel} has no spectral power to whiten");
            return None;
        };
        let threshold = self.level * median;

        let mut increment = vec![1.0f32; nf + 1];
        let mut flagged = 0;
        for (from, to, rms) in windows {
            if rms > threshold {
                increment[from..to].fill((threshold / rms) as f32);
                flagged += 1;
            }
        }
        if flagged == 0 {
            return None;
        }
        log::trace!("channel {channel}: whitening {flagged} spectral windows");
        Some(increment)
    }
}
