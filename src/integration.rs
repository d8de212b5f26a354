//! This module defines the detector data the filters operate on: channels, frames and
//! integrations (contiguous, uniformly sampled blocks of frames).
//!
//! Filters never own these structures. They read the samples, subtract the signal they
//! reject, and update the designated scalars of each channel and frame.

use crate::dependents::Dependents;
use ndarray::Array1;
use std::collections::HashMap;
use uuid::Uuid;

/// A single detector element.
///
/// # Fields
/// - `index`: Position of the channel in the integration's channel list.
/// - `flags`: Channel flag bits, see [`Channel::FLAG_DEAD`].
/// - `noise_whitening`: Running noise-whitening factor, updated multiplicatively by filters.
/// - `direct_filtering`: Running point-source throughput, updated multiplicatively by filters.
/// - `dependents`: Degrees of freedom consumed by processing steps on this channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Channel {
    pub index: usize,
    pub flags: u32,
    pub noise_whitening: f64,
    pub direct_filtering: f64,
    pub dependents: f64,
}

impl Channel {
    /// All samples of a dead channel are treated as invalid.
    pub const FLAG_DEAD: u32 = 1 << 0;

    pub fn new(index: usize) -> Self {
        Channel {
            index,
            flags: 0,
            noise_whitening: 1.0,
            direct_filtering: 1.0,
            dependents: 0.0,
        }
    }

    pub fn is_flagged(&self, mask: u32) -> bool {
        self.flags & mask != 0
    }
}

/// One time sample across all channels.
///
/// # Fields
/// - `data`: One sample per channel.
/// - `sample_flags`: Flag bits per channel sample, see [`Frame::SAMPLE_SKIP`].
/// - `flags`: Frame flag bits, see [`Frame::FLAG_MODELING`].
/// - `relative_weight`: Noise weight of the frame relative to the integration.
/// - `dependents`: Degrees of freedom consumed by processing steps in this frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub data: Array1<f32>,
    pub sample_flags: Array1<u8>,
    pub flags: u32,
    pub relative_weight: f32,
    pub dependents: f64,
}

impl Frame {
    /// Frames excluded from modeling (e.g. turnarounds).
    pub const FLAG_MODELING: u32 = 1 << 0;
    /// Individual samples excluded from modeling (e.g. spikes).
    pub const SAMPLE_SKIP: u8 = 1 << 0;

    pub fn new(channels: usize) -> Self {
        Frame {
            data: Array1::zeros(channels),
            sample_flags: Array1::zeros(channels),
            flags: 0,
            relative_weight: 1.0,
            dependents: 0.0,
        }
    }

    /// Whether the frame takes part in modeling at all.
    pub fn is_usable(&self) -> bool {
        self.flags & Frame::FLAG_MODELING == 0
            && self.relative_weight.is_finite()
            && self.relative_weight > 0.0
    }

    /// Whether the sample of `channel` may be used to estimate filter responses.
    pub fn is_valid_sample(&self, channel: usize) -> bool {
        self.is_usable()
            && self.sample_flags[channel] & Frame::SAMPLE_SKIP == 0
            && self.data[channel].is_finite()
    }
}

/// A contiguous, uniformly sampled block of frames.
///
/// Missing frames are stored as `None`. The timing fields define the frequency grid of the
/// filters bound to the integration:
/// - `sampling_interval`: Time between frames in seconds.
/// - `filter_time_scale`: Longest time scale kept by the reduction; the high-pass cutoff is
///   `0.5 / filter_time_scale`. Infinite or NaN means no cutoff.
/// - `point_crossing_time`: Time a point source takes to cross the beam (FWHM), in seconds.
#[derive(Clone, Debug)]
pub struct Integration {
    id: Uuid,
    pub frames: Vec<Option<Frame>>,
    pub channels: Vec<Channel>,
    pub sampling_interval: f64,
    pub filter_time_scale: f64,
    pub point_crossing_time: f64,
    history: Vec<String>,
    dependents: HashMap<String, Dependents>,
}

impl Integration {
    /// Creates an integration of `frames` zero-valued frames for `channels` channels.
    pub fn new(channels: usize, frames: usize, sampling_interval: f64) -> Self {
        Integration {
            id: Uuid::new_v4(),
            frames: (0..frames).map(|_| Some(Frame::new(channels))).collect(),
            channels: (0..channels).map(Channel::new).collect(),
            sampling_interval,
            filter_time_scale: f64::INFINITY,
            point_crossing_time: f64::NAN,
            history: Vec::new(),
            dependents: HashMap::new(),
        }
    }

    /// The identity filters use to check which integration they are bound to.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of frame slots, including missing frames.
    pub fn size(&self) -> usize {
        self.frames.len()
    }

    /// Fills the samples of `channel` with `signal(frame_index)` in every present frame.
    pub fn set_channel_signal(&mut self, channel: usize, signal: impl Fn(usize) -> f32) {
        for (t, frame) in self.frames.iter_mut().enumerate() {
            if let Some(frame) = frame {
                frame.data[channel] = signal(t);
            }
        }
    }

    /// Samples of `channel` in frame order. Missing frames read as NaN.
    pub fn channel_signal(&self, channel: usize) -> Vec<f32> {
        self.frames
            .iter()
            .map(|frame| frame.as_ref().map_or(f32::NAN, |f| f.data[channel]))
            .collect()
    }

    /// The processing steps applied so far, as short filter IDs.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn append_history(&mut self, id: &str) {
        self.history.push(id.to_string());
    }

    /// Removes the dependents ledger stored under `name` from the integration, creating an
    /// empty one if none exists. Hand it back with [`Integration::restore_dependents`].
    pub fn take_dependents(&mut self, name: &str) -> Dependents {
        self.dependents
            .remove(name)
            .unwrap_or_else(|| Dependents::new(name, self.channels.len(), self.frames.len()))
    }

    pub fn restore_dependents(&mut self, dependents: Dependents) {
        self.dependents
            .insert(dependents.name().to_string(), dependents);
    }

    pub fn dependents(&self, name: &str) -> Option<&Dependents> {
        self.dependents.get(name)
    }
}
