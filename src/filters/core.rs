//! Shared state of every filter: the binding to an integration, the padded working buffers
//! and the FFT plans.
//!
//! The buffers are reused for every channel. A filter instance therefore handles one channel
//! at a time; concurrent workers each need their own instance.

use crate::error::FilterResult;
use crate::integration::{Channel, Integration};
use crate::math_tools::{finite_or_zero, pow2_ceil};
use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Snapshot of the integration properties a filter depends on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Binding {
    pub integration_id: Uuid,
    pub frames: usize,
    pub channels: usize,
    pub sampling_interval: f64,
    pub filter_time_scale: f64,
    pub point_crossing_time: f64,
}

impl Binding {
    pub fn of(integration: &Integration) -> Self {
        Binding {
            integration_id: integration.id(),
            frames: integration.size(),
            channels: integration.channels.len(),
            sampling_interval: integration.sampling_interval,
            filter_time_scale: integration.filter_time_scale,
            point_crossing_time: integration.point_crossing_time,
        }
    }
}

/// Working buffers and frequency grid of a filter.
///
/// # Buffers
/// - `data`: Weighted, leveled time stream of the current channel, zero-padded to `nt`.
/// - `filtered`: Rejected signal of the current channel in the time domain.
/// - `spectrum`: `nf + 1` complex bins from DC to Nyquist.
#[derive(Clone)]
pub struct FilterCore {
    binding: Binding,
    nt: usize,
    nf: usize,
    df: f64,
    pub(crate) data: Vec<f32>,
    pub(crate) filtered: Vec<f32>,
    pub(crate) spectrum: Vec<Complex32>,
    weights: Vec<f32>,
    valid: Vec<bool>,
    scratch: Vec<Complex32>,
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    points: f64,
    channels: Vec<usize>,
    dft: bool,
}

impl Debug for FilterCore {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCore")
            .field("binding", &self.binding)
            .field("nt", &self.nt)
            .field("nf", &self.nf)
            .field("df", &self.df)
            .field("channels", &self.channels.len())
            .field("dft", &self.dft)
            .finish_non_exhaustive()
    }
}

impl FilterCore {
    pub fn new(integration: &Integration) -> Self {
        let binding = Binding::of(integration);
        let nt = pow2_ceil(binding.frames);
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(nt);
        let c2r = planner.plan_fft_inverse(nt);
        let mut core = FilterCore {
            binding,
            nt,
            nf: nt / 2,
            df: 0.0,
            data: Vec::new(),
            filtered: Vec::new(),
            spectrum: Vec::new(),
            weights: Vec::new(),
            valid: Vec::new(),
            scratch: Vec::new(),
            r2c,
            c2r,
            points: 0.0,
            channels: Vec::new(),
            dft: false,
        };
        core.allocate();
        core.bind(integration);
        core
    }

    /// Binds to `integration`: recomputes the frequency grid, resets the channel set to all
    /// channels, and reallocates buffers and plans only if the padded length changed.
    ///
    /// # Returns
    /// `true` if the buffers were reallocated.
    pub fn bind(&mut self, integration: &Integration) -> bool {
        self.binding = Binding::of(integration);
        let nt = pow2_ceil(self.binding.frames);
        let reallocated = nt != self.nt;
        if reallocated {
            log::debug!("reallocating filter buffers: {} -> {} samples", self.nt, nt);
            let mut planner = RealFftPlanner::<f32>::new();
            self.r2c = planner.plan_fft_forward(nt);
            self.c2r = planner.plan_fft_inverse(nt);
            self.nt = nt;
            self.nf = nt / 2;
            self.allocate();
        }
        self.df = 1.0 / (self.nt as f64 * self.binding.sampling_interval);
        self.channels = (0..self.binding.channels).collect();
        reallocated
    }

    fn allocate(&mut self) {
        self.data = vec![0.0; self.nt];
        self.filtered = vec![0.0; self.nt];
        self.weights = vec![0.0; self.nt];
        self.valid = vec![false; self.nt];
        self.spectrum = self.r2c.make_output_vec();
        let scratch_len = self
            .r2c
            .get_scratch_len()
            .max(self.c2r.get_scratch_len());
        self.scratch = vec![Complex32::new(0.0, 0.0); scratch_len];
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn integration_id(&self) -> Uuid {
        self.binding.integration_id
    }

    /// Padded transform length.
    pub fn nt(&self) -> usize {
        self.nt
    }

    /// Index of the Nyquist bin.
    pub fn nf(&self) -> usize {
        self.nf
    }

    /// Frequency spacing of the bins in Hz.
    pub fn df(&self) -> f64 {
        self.df
    }

    /// Total weight of the valid samples of the last loaded channel.
    pub fn points(&self) -> f64 {
        self.points
    }

    pub fn channels(&self) -> &[usize] {
        &self.channels
    }

    pub fn set_channels(&mut self, channels: Vec<usize>) {
        self.channels = channels;
    }

    pub fn is_dft(&self) -> bool {
        self.dft
    }

    pub fn set_dft(&mut self, dft: bool) {
        self.dft = dft;
    }

    /// First frequency bin above the high-pass cutoff `0.5 / filter_time_scale`.
    ///
    /// Falls back to 1 when the cutoff is undefined or negative.
    pub fn min_index(&self) -> usize {
        let cutoff = 0.5 / self.binding.filter_time_scale;
        if !cutoff.is_finite() || cutoff < 0.0 || !self.df.is_finite() || self.df <= 0.0 {
            return 1;
        }
        ((cutoff / self.df).ceil() as usize).clamp(1, self.nf.max(1))
    }

    /// Loads the weighted time stream of `channel` into `data`.
    ///
    /// Invalid samples (missing or flagged frames, flagged or non-finite samples, dead
    /// channels) are stored as NaN until the buffer is leveled.
    pub fn load_time_stream(&mut self, integration: &Integration, channel: usize) {
        let dead = integration.channels[channel].is_flagged(Channel::FLAG_DEAD);
        self.points = 0.0;

        for t in 0..self.nt {
            let sample = if dead {
                None
            } else {
                integration
                    .frames
                    .get(t)
                    .and_then(|frame| frame.as_ref())
                    .filter(|frame| frame.is_valid_sample(channel))
                    .map(|frame| (frame.data[channel], frame.relative_weight))
            };
            match sample {
                Some((value, weight)) => {
                    self.data[t] = weight * value;
                    self.weights[t] = weight;
                    self.valid[t] = true;
                    self.points += weight as f64;
                }
                None => {
                    self.data[t] = f32::NAN;
                    self.weights[t] = 0.0;
                    self.valid[t] = false;
                }
            }
        }
    }

    /// Removes the weighted mean from the loaded time stream. Invalid samples become 0.
    pub fn level(&mut self) {
        let sum: f64 = self
            .data
            .iter()
            .zip(&self.valid)
            .filter(|(_, valid)| **valid)
            .map(|(x, _)| *x as f64)
            .sum();
        let mean = if self.points > 0.0 {
            finite_or_zero(sum / self.points)
        } else {
            0.0
        };

        for ((x, w), valid) in self.data.iter_mut().zip(&self.weights).zip(&self.valid) {
            *x = if *valid {
                finite_or_zero(*x - (*w as f64 * mean) as f32)
            } else {
                0.0
            };
        }
    }

    /// Removes the mean of `signal`, weighted like the loaded time stream, from its valid
    /// samples. Invalid samples become 0.
    pub fn level_for(&self, signal: &mut [f32]) {
        let (sum, sum_w) = signal
            .iter()
            .zip(&self.weights)
            .zip(&self.valid)
            .filter(|(_, valid)| **valid)
            .fold((0.0f64, 0.0f64), |(sum, sum_w), ((x, w), _)| {
                (sum + *w as f64 * *x as f64, sum_w + *w as f64)
            });
        let mean = if sum_w > 0.0 {
            finite_or_zero(sum / sum_w) as f32
        } else {
            0.0
        };

        for (x, valid) in signal.iter_mut().zip(&self.valid) {
            *x = if *valid { finite_or_zero(*x - mean) } else { 0.0 };
        }
    }

    /// Levels the rejected signal in `filtered`.
    pub fn level_rejected(&mut self) {
        let mut filtered = std::mem::take(&mut self.filtered);
        self.level_for(&mut filtered);
        self.filtered = filtered;
    }

    /// Clears the rejected signal, e.g. for a channel without valid samples.
    pub fn clear_rejected(&mut self) {
        self.filtered.fill(0.0);
    }

    /// Forward real FFT of `data` into `spectrum`. The contents of `data` are destroyed.
    pub fn forward(&mut self) -> FilterResult<()> {
        self.r2c
            .process_with_scratch(&mut self.data, &mut self.spectrum, &mut self.scratch)?;
        Ok(())
    }

    /// Inverse real FFT of `spectrum` into `filtered`, normalized by `1 / nt`.
    ///
    /// The contents of `spectrum` are destroyed.
    pub fn inverse(&mut self, spectrum: &mut [Complex32]) -> FilterResult<()> {
        // DC and Nyquist of a real signal have no imaginary part.
        spectrum[0].im = 0.0;
        spectrum[self.nf].im = 0.0;
        self.c2r
            .process_with_scratch(spectrum, &mut self.filtered, &mut self.scratch)?;

        let norm = 1.0 / self.nt as f32;
        for x in self.filtered.iter_mut() {
            *x = finite_or_zero(*x * norm);
        }
        Ok(())
    }

    /// Subtracts the rejected signal from `channel` in every present frame.
    pub fn remove_rejected(&self, integration: &mut Integration, channel: usize) {
        for (frame, rejected) in integration.frames.iter_mut().zip(&self.filtered) {
            if let Some(frame) = frame {
                frame.data[channel] -= *rejected;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::Frame;
    use approx::assert_relative_eq;

    #[test]
    fn test_frequency_grid() {
        let integration = Integration::new(3, 1000, 0.01);
        let core = FilterCore::new(&integration);
        assert_eq!(core.nt(), 1024);
        assert_eq!(core.nf(), 512);
        assert_relative_eq!(core.df(), 1.0 / 10.24);
        assert_eq!(core.channels(), &[0, 1, 2]);
        assert_eq!(core.spectrum.len(), 513);
    }

    #[test]
    fn test_rebinding_reallocates_only_on_length_change() {
        let a = Integration::new(1, 1000, 0.01);
        let b = Integration::new(4, 1020, 0.02);
        let c = Integration::new(1, 3000, 0.01);
        let mut core = FilterCore::new(&a);

        assert!(!core.bind(&b));
        assert_eq!(core.integration_id(), b.id());
        assert_eq!(core.channels().len(), 4);
        assert_relative_eq!(core.df(), 1.0 / 20.48);

        assert!(core.bind(&c));
        assert_eq!(core.nt(), 4096);
        assert_eq!(core.data.len(), 4096);
    }

    #[test]
    fn test_min_index() {
        let mut integration = Integration::new(1, 1024, 0.01);
        assert_eq!(FilterCore::new(&integration).min_index(), 1);

        // df = 1/10.24 Hz, cutoff = 0.25 Hz -> 2.56 bins
        integration.filter_time_scale = 2.0;
        assert_eq!(FilterCore::new(&integration).min_index(), 3);

        integration.filter_time_scale = -2.0;
        assert_eq!(FilterCore::new(&integration).min_index(), 1);

        integration.filter_time_scale = f64::NAN;
        assert_eq!(FilterCore::new(&integration).min_index(), 1);
    }

    #[test]
    fn test_level_removes_weighted_mean_and_zeroes_invalid() {
        let mut integration = Integration::new(1, 4, 1.0);
        integration.set_channel_signal(0, |t| [1.0, 2.0, 3.0, 100.0][t]);
        if let Some(frame) = integration.frames[1].as_mut() {
            frame.relative_weight = 2.0;
        }
        if let Some(frame) = integration.frames[3].as_mut() {
            frame.sample_flags[0] = Frame::SAMPLE_SKIP;
        }

        let mut core = FilterCore::new(&integration);
        core.load_time_stream(&integration, 0);
        assert!(core.data[3].is_nan());
        assert_relative_eq!(core.points(), 4.0);

        core.level();
        // weighted mean = (1 + 4 + 3) / 4 = 2
        assert_relative_eq!(core.data[0], -1.0);
        assert_relative_eq!(core.data[1], 0.0);
        assert_relative_eq!(core.data[2], 1.0);
        assert_eq!(core.data[3], 0.0);
    }

    #[test]
    fn test_zero_weight_channel_is_zeroed() {
        let mut integration = Integration::new(1, 8, 1.0);
        integration.set_channel_signal(0, |t| t as f32);
        integration.channels[0].flags = Channel::FLAG_DEAD;

        let mut core = FilterCore::new(&integration);
        core.load_time_stream(&integration, 0);
        core.level();
        assert_eq!(core.points(), 0.0);
        assert!(core.data.iter().all(|x| *x == 0.0));

        let mut signal = vec![f32::NAN; 8];
        core.level_for(&mut signal);
        assert!(signal.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_forward_inverse_restores_signal() {
        let mut integration = Integration::new(1, 64, 1.0);
        integration.set_channel_signal(0, |t| (t as f32 * 0.3).sin());
        let mut core = FilterCore::new(&integration);
        core.load_time_stream(&integration, 0);
        core.level();
        let leveled = core.data.clone();

        core.forward().unwrap();
        let mut spectrum = std::mem::take(&mut core.spectrum);
        core.inverse(&mut spectrum).unwrap();

        for (a, b) in leveled.iter().zip(&core.filtered) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
    }
}
