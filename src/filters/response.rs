//! Versioned bookkeeping of the response factors a filter has applied to each channel.
//!
//! The same filter instance runs in every iteration of the reduction. Before it filters a
//! channel again, the factors it applied last time are divided out of the channel's running
//! `noise_whitening` and `direct_filtering` scalars; after filtering, the new factors are
//! multiplied back in. The ledger is not reentrant: discount and reapply of one channel must
//! not interleave with another transaction on the same channel.

use crate::integration::Channel;
use crate::math_tools::finite_or_zero;

/// Response of a filter as seen by a channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Response {
    /// Mean-square throughput above the high-pass cutoff.
    pub noise_whitening: f64,
    /// Fraction of a point-source signal surviving the filter.
    pub point_throughput: f64,
}

impl Response {
    pub const NEUTRAL: Response = Response {
        noise_whitening: 1.0,
        point_throughput: 1.0,
    };
}

impl Default for Response {
    fn default() -> Self {
        Response::NEUTRAL
    }
}

#[derive(Clone, Debug, Default)]
pub struct ResponseLedger {
    applied: Vec<Response>,
    versions: Vec<u64>,
}

impl ResponseLedger {
    pub fn new(channels: usize) -> Self {
        ResponseLedger {
            applied: vec![Response::NEUTRAL; channels],
            versions: vec![0; channels],
        }
    }

    /// Forgets every applied factor, e.g. after binding to another integration.
    pub fn reset(&mut self, channels: usize) {
        self.applied = vec![Response::NEUTRAL; channels];
        self.versions = vec![0; channels];
    }

    /// The factors currently applied to the channel at `index`.
    pub fn applied(&self, index: usize) -> Response {
        self.applied.get(index).copied().unwrap_or_default()
    }

    /// Number of completed discount and reapply steps on the channel at `index`.
    pub fn version(&self, index: usize) -> u64 {
        self.versions.get(index).copied().unwrap_or(0)
    }

    /// Divides the previously applied factors out of the channel.
    ///
    /// Factors that are zero cannot be divided out; they are dropped and the channel keeps
    /// its current value.
    pub fn discount(&mut self, channel: &mut Channel) {
        let index = channel.index;
        self.ensure(index);
        let applied = self.applied[index];

        if applied.noise_whitening > 0.0 {
            channel.noise_whitening /= applied.noise_whitening;
        } else {
            log::warn!("cannot discount zero noise whitening of channel {index}");
        }
        if applied.point_throughput > 0.0 {
            channel.direct_filtering /= applied.point_throughput;
        } else {
            log::warn!("cannot discount zero point throughput of channel {index}");
        }

        self.applied[index] = Response::NEUTRAL;
        self.versions[index] += 1;
    }

    /// Multiplies the new factors into the channel and records them.
    pub fn reapply(&mut self, channel: &mut Channel, response: Response) {
        let index = channel.index;
        self.ensure(index);
        let response = Response {
            noise_whitening: finite_or_zero(response.noise_whitening),
            point_throughput: finite_or_zero(response.point_throughput),
        };

        channel.noise_whitening *= response.noise_whitening;
        channel.direct_filtering *= response.point_throughput;

        self.applied[index] = response;
        self.versions[index] += 1;
    }

    fn ensure(&mut self, index: usize) {
        if self.applied.len() <= index {
            self.applied.resize(index + 1, Response::NEUTRAL);
            self.versions.resize(index + 1, 0);
        }
    }
}
