//! Notch filter rejecting explicit frequency ranges, e.g. pulse-tube lines or scan-synchronous
//! pickup.

use crate::config::FilterSettings;
use crate::error::{FilterError, FilterResult};
use crate::filters::core::FilterCore;
use crate::filters::filter::{Filter, RegisteredFilter};
use crate::filters::response::ResponseLedger;
use crate::integration::Integration;
use filter_macros::register_filter;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Tolerance, in bins, when deciding whether a bin centre lies on a range boundary.
const BIN_TOLERANCE: f64 = 1e-6;

/// A closed frequency interval in Hz.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyRange {
    pub min: f64,
    pub max: f64,
}

impl FrequencyRange {
    pub fn new(min: f64, max: f64) -> Self {
        FrequencyRange { min, max }
    }

    /// The range `[|center| - |half_width|, |center| + |half_width|]`.
    pub fn around(center: f64, half_width: f64) -> Self {
        FrequencyRange {
            min: center.abs() - half_width.abs(),
            max: center.abs() + half_width.abs(),
        }
    }
}

impl Display for FrequencyRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.min, self.max)
    }
}

impl FromStr for FrequencyRange {
    type Err = FilterError;

    /// Parses `"from:to"` or `"from--to"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (from, to) = s
            .split_once("--")
            .or_else(|| s.split_once(':'))
            .ok_or_else(|| FilterError::InvalidRange(s.to_string()))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<f64>()
                .map_err(|_| FilterError::InvalidRange(s.to_string()))
        };
        let (min, max) = (parse(from)?, parse(to)?);
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(FilterError::InvalidRange(s.to_string()));
        }
        Ok(FrequencyRange { min, max })
    }
}

/// Rejects every frequency bin whose centre lies in one of the killed ranges.
///
/// Depending on the number of rejected bins, the rejected signal is computed either by direct
/// summation over those bins or with a full FFT, whichever is estimated to be cheaper.
#[register_filter]
#[derive(Clone, Debug)]
pub struct KillFilter {
    core: FilterCore,
    reject: Vec<bool>,
    components: usize,
    ranges: Vec<FrequencyRange>,
    ledger: ResponseLedger,
}

impl KillFilter {
    pub fn new(integration: &Integration) -> Self {
        let core = FilterCore::new(integration);
        let mut filter = KillFilter {
            reject: vec![false; core.nf()],
            components: 0,
            ranges: Vec::new(),
            ledger: ResponseLedger::new(integration.channels.len()),
            core,
        };
        filter.auto_dft();
        filter
    }

    /// Rejects the bins with centres in `[|frequency| - |delta|, |frequency| + |delta|]`.
    pub fn kill(&mut self, frequency: f64, delta: f64) {
        self.kill_range(FrequencyRange::around(frequency, delta));
    }

    /// Rejects the bins with centres in `range`. Bins already rejected stay rejected and are
    /// not counted again.
    pub fn kill_range(&mut self, range: FrequencyRange) {
        self.ranges.push(range);
        self.mark(range);
        self.auto_dft();
    }

    fn mark(&mut self, range: FrequencyRange) {
        let df = self.core.df();
        if self.reject.is_empty() || range.max < 0.0 || !(df > 0.0) {
            return;
        }
        let from = (range.min.max(0.0) / df - BIN_TOLERANCE).ceil() as usize;
        let to = ((range.max / df + BIN_TOLERANCE).floor() as usize).min(self.reject.len() - 1);

        for bin in from..=to {
            if !self.reject[bin] {
                self.reject[bin] = true;
                self.components += 1;
            }
        }
    }

    /// Chooses direct summation or FFT by their estimated operation counts.
    pub fn auto_dft(&mut self) {
        let frames = self.core.binding().frames as f64;
        let nt = self.core.nt() as f64;
        let dft_cost = 51.0 * self.components as f64 * frames;
        let fft_cost = 31.0 * nt.log2() * nt + 44.0 * nt;
        let dft = dft_cost < fft_cost;
        if dft != self.core.is_dft() {
            log::debug!(
                "kill filter switching to {} ({} components)",
                if dft { "direct summation" } else { "FFT" },
                self.components
            );
        }
        self.core.set_dft(dft);
    }

    /// Number of rejected bins.
    pub fn components(&self) -> usize {
        self.components
    }

    pub fn is_rejected(&self, bin: usize) -> bool {
        self.reject.get(bin).copied().unwrap_or(false)
    }

    pub fn ranges(&self) -> &[FrequencyRange] {
        &self.ranges
    }

    pub fn ledger(&self) -> &ResponseLedger {
        &self.ledger
    }
}

impl Filter for KillFilter {
    fn core(&self) -> &FilterCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.core
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn id(&self) -> String {
        "K".to_string()
    }

    fn throughput_at(&self, bin: usize) -> f64 {
        // The Nyquist bin reads the rejection state stored at index 1.
        let rejected = if bin == self.reject.len() {
            self.is_rejected(1)
        } else {
            self.is_rejected(bin)
        };
        if rejected {
            0.0
        } else {
            1.0
        }
    }

    fn count_parms(&self) -> f64 {
        self.reject
            .iter()
            .skip(self.min_index())
            .filter(|rejected| **rejected)
            .count() as f64
    }

    fn configure(&mut self, settings: &FilterSettings) -> FilterResult<()> {
        for band in &settings.kill.bands {
            self.kill_range(band.parse()?);
        }
        Ok(())
    }

    fn set_integration(&mut self, integration: &Integration) {
        self.core.bind(integration);
        self.reject = vec![false; self.core.nf()];
        self.components = 0;
        for range in self.ranges.clone() {
            self.mark(range);
        }
        self.ledger.reset(integration.channels.len());
        self.auto_dft();
    }

    fn filter_channel(&mut self, integration: &mut Integration, channel: usize) -> FilterResult<()> {
        self.ledger.discount(&mut integration.channels[channel]);
        self.reject_channel(integration, channel)?;
        let response = self.response();
        self.ledger
            .reapply(&mut integration.channels[channel], response);
        Ok(())
    }
}
