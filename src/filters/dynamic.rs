//! Profiled filters with one profile per channel, refined while filtering.
//!
//! A [`DynamicFilter`] keeps a transfer profile per channel. Each time a channel is filtered
//! through the FFT path, its [`ProfileSource`] inspects the channel spectrum and may return an
//! incremental profile, which is multiplied into the channel's profile before the rejection
//! is applied. The profile therefore always describes the cumulative response of the channel,
//! and the throughput carries no round exponent.

use crate::config::FilterSettings;
use crate::error::FilterResult;
use crate::filters::core::FilterCore;
use crate::filters::filter::{filter_channel_default, Filter, RegisteredFilter};
use crate::filters::profiled::{clamp_unit, ProfiledFilter};
use crate::filters::response::{Response, ResponseLedger};
use crate::integration::Integration;
use realfft::num_complex::Complex32;
use std::fmt::Debug;

/// Derives profile increments from channel spectra.
pub trait ProfileSource: Clone + Debug + Send + Sync + 'static {
    /// Registry tag of the filter built on this source.
    const NAME: &'static str;
    /// History tag of the filter built on this source.
    const ID: &'static str;

    fn from_settings(settings: &FilterSettings) -> FilterResult<Self>;

    /// The factor by which the profile of `channel` should change, sampled uniformly from DC
    /// to Nyquist, or `None` to leave it unchanged.
    fn incremental_profile(
        &mut self,
        core: &FilterCore,
        channel: usize,
        spectrum: &[Complex32],
    ) -> Option<Vec<f32>>;
}

#[derive(Clone, Debug)]
pub struct DynamicFilter<S: ProfileSource> {
    base: ProfiledFilter,
    profiles: Vec<Option<Vec<f32>>>,
    /// Channel whose profile currently sits in `base`.
    active: Option<usize>,
    ledger: ResponseLedger,
    source: S,
}

impl<S: ProfileSource> DynamicFilter<S> {
    pub fn new(integration: &Integration, source: S) -> Self {
        let channels = integration.channels.len();
        DynamicFilter {
            base: ProfiledFilter::new(integration),
            profiles: vec![None; channels],
            active: None,
            ledger: ResponseLedger::new(channels),
            source,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// The current profile of `channel`, `None` if the channel has not been shaped yet.
    pub fn profile(&self, channel: usize) -> Option<&[f32]> {
        if self.active == Some(channel) {
            self.base.profile()
        } else {
            self.profiles.get(channel).and_then(|p| p.as_deref())
        }
    }

    /// Replaces the profile of `channel`. Values are clamped into [0, 1].
    pub fn set_profile(&mut self, channel: usize, values: &[f32]) {
        self.activate(channel);
        self.base.set_profile(values);
    }

    /// The response factors currently applied to `channel`.
    pub fn applied(&self, channel: usize) -> Response {
        self.ledger.applied(channel)
    }

    /// Makes the profile of `channel` the one seen by `throughput_at`.
    pub fn activate(&mut self, channel: usize) {
        if self.active == Some(channel) {
            return;
        }
        if self.profiles.len() <= channel {
            self.profiles.resize(channel + 1, None);
        }
        if let Some(previous) = self.active.take() {
            self.profiles[previous] = self.base.profile.take();
        }
        self.base.profile = self.profiles[channel].take();
        self.active = Some(channel);
    }

    fn apply_increment(&mut self, increment: &[f32]) {
        if increment.is_empty() {
            return;
        }
        let profile = self
            .base
            .profile
            .get_or_insert_with(|| vec![1.0; increment.len()]);
        let len = profile.len();
        for (i, p) in profile.iter_mut().enumerate() {
            let j = i * increment.len() / len;
            *p = clamp_unit(*p * increment[j]);
        }
    }
}

impl<S: ProfileSource> Filter for DynamicFilter<S> {
    fn core(&self) -> &FilterCore {
        &self.base.core
    }

    fn core_mut(&mut self) -> &mut FilterCore {
        &mut self.base.core
    }

    fn name(&self) -> &'static str {
        S::NAME
    }

    fn id(&self) -> String {
        S::ID.to_string()
    }

    fn throughput_at(&self, bin: usize) -> f64 {
        self.base.profile_at(bin)
    }

    fn count_parms(&self) -> f64 {
        self.base.profile_parms()
    }

    fn set_integration(&mut self, integration: &Integration) {
        let channels = integration.channels.len();
        self.base.set_integration(integration);
        self.base.profile = None;
        self.profiles = vec![None; channels];
        self.active = None;
        self.ledger.reset(channels);
    }

    fn update_response(&mut self, channel: usize, spectrum: &[Complex32]) {
        self.activate(channel);
        let increment = self
            .source
            .incremental_profile(&self.base.core, channel, spectrum);
        if let Some(increment) = increment {
            self.apply_increment(&increment);
        }
    }

    fn reject_channel(&mut self, integration: &mut Integration, channel: usize) -> FilterResult<()> {
        self.activate(channel);
        filter_channel_default(self, integration, channel)
    }

    fn filter_channel(&mut self, integration: &mut Integration, channel: usize) -> FilterResult<()> {
        self.activate(channel);
        self.ledger.discount(&mut integration.channels[channel]);
        self.reject_channel(integration, channel)?;
        let response = self.response();
        self.ledger
            .reapply(&mut integration.channels[channel], response);
        Ok(())
    }
}

impl<S: ProfileSource> RegisteredFilter for DynamicFilter<S> {
    const NAME: &'static str = S::NAME;

    fn create(integration: &Integration, settings: &FilterSettings) -> FilterResult<Box<dyn Filter>> {
        let mut filter = DynamicFilter::new(integration, S::from_settings(settings)?);
        filter.configure(settings)?;
        Ok(Box::new(filter))
    }
}
