//! Bookkeeping of the degrees of freedom consumed by a processing step.
//!
//! Every step that fits parameters to the data owns one `Dependents` ledger per integration.
//! The ledger remembers how much it has booked to each channel and frame, so that the next
//! application of the same step first removes its old contribution before booking the new one.

use crate::integration::{Channel, Frame};

#[derive(Clone, Debug, PartialEq)]
pub struct Dependents {
    name: String,
    for_channel: Vec<f64>,
    for_frame: Vec<f64>,
}

impl Dependents {
    pub fn new(name: &str, channels: usize, frames: usize) -> Self {
        Dependents {
            name: name.to_string(),
            for_channel: vec![0.0; channels],
            for_frame: vec![0.0; frames],
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn for_channel(&self, channel: usize) -> f64 {
        self.for_channel.get(channel).copied().unwrap_or(0.0)
    }

    pub fn for_frame(&self, frame: usize) -> f64 {
        self.for_frame.get(frame).copied().unwrap_or(0.0)
    }

    /// Sum of the degrees of freedom booked to frames.
    pub fn frame_total(&self) -> f64 {
        self.for_frame.iter().sum()
    }

    /// Sum of the degrees of freedom booked to channels.
    pub fn channel_total(&self) -> f64 {
        self.for_channel.iter().sum()
    }

    /// Withdraws the previously applied contribution from `channels[channel]`.
    pub fn clear_channel(&mut self, channels: &mut [Channel], channel: usize) {
        self.ensure_channels(channels.len());
        channels[channel].dependents -= self.for_channel[channel];
        self.for_channel[channel] = 0.0;
    }

    /// Withdraws the previously applied contribution from every present frame.
    pub fn clear_frames(&mut self, frames: &mut [Option<Frame>]) {
        self.ensure_frames(frames.len());
        for (t, frame) in frames.iter_mut().enumerate() {
            if let Some(frame) = frame {
                frame.dependents -= self.for_frame[t];
            }
            self.for_frame[t] = 0.0;
        }
    }

    pub fn add_channel(&mut self, channel: usize, dp: f64) {
        self.ensure_channels(channel + 1);
        self.for_channel[channel] += dp;
    }

    pub fn add_frame(&mut self, frame: usize, dp: f64) {
        self.ensure_frames(frame + 1);
        self.for_frame[frame] += dp;
    }

    /// Books the accumulated contributions to the given channels and to all present frames.
    ///
    /// Must follow a `clear_*` of the same entries, otherwise contributions are counted twice.
    pub fn apply(&self, channels: &mut [Channel], channel_set: &[usize], frames: &mut [Option<Frame>]) {
        for &c in channel_set {
            if let (Some(channel), Some(dp)) = (channels.get_mut(c), self.for_channel.get(c)) {
                channel.dependents += dp;
            }
        }
        for (frame, dp) in frames.iter_mut().zip(&self.for_frame) {
            if let Some(frame) = frame {
                frame.dependents += dp;
            }
        }
    }

    fn ensure_channels(&mut self, len: usize) {
        if self.for_channel.len() < len {
            self.for_channel.resize(len, 0.0);
        }
    }

    fn ensure_frames(&mut self, len: usize) {
        if self.for_frame.len() < len {
            self.for_frame.resize(len, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::Integration;

    #[test]
    fn test_clear_then_apply_does_not_accumulate() {
        let mut integration = Integration::new(2, 4, 0.1);
        let mut parms = integration.take_dependents("test");

        for _ in 0..3 {
            parms.clear_frames(&mut integration.frames);
            for c in 0..2 {
                parms.clear_channel(&mut integration.channels, c);
                parms.add_channel(c, 1.5);
            }
            for t in 0..4 {
                parms.add_frame(t, 0.75);
            }
            parms.apply(&mut integration.channels, &[0, 1], &mut integration.frames);
        }

        for channel in &integration.channels {
            assert_eq!(channel.dependents, 1.5);
        }
        for frame in integration.frames.iter().flatten() {
            assert_eq!(frame.dependents, 0.75);
        }
        assert_eq!(parms.channel_total(), 3.0);
        assert_eq!(parms.frame_total(), 3.0);
    }

    #[test]
    fn test_missing_frames_are_skipped() {
        let mut integration = Integration::new(1, 3, 0.1);
        integration.frames[1] = None;
        let mut parms = integration.take_dependents("test");
        parms.clear_frames(&mut integration.frames);
        parms.add_frame(0, 1.0);
        parms.apply(&mut integration.channels, &[0], &mut integration.frames);

        assert_eq!(integration.frames[0].as_ref().unwrap().dependents, 1.0);
        assert!(integration.frames[1].is_none());
    }
}
