//! Filter with an arbitrary transfer profile.

use crate::config::FilterSettings;
use crate::error::FilterResult;
use crate::filters::core::FilterCore;
use crate::filters::filter::{Filter, RegisteredFilter};
use crate::filters::response::ResponseLedger;
use crate::integration::Integration;
use crate::math_tools::profile_index;
use filter_macros::register_filter;

/// Applies a transfer profile sampled uniformly from DC to Nyquist.
///
/// Every call to [`Filter::filter`] on the bound integration counts as one more application of
/// the same nominal filter: the throughput at a bin is the profile value raised to the number
/// of rounds. Binding to another integration starts over at zero rounds.
/// Without a profile the filter passes everything.
#[register_filter]
#[derive(Clone, Debug)]
pub struct ProfiledFilter {
    pub(crate) core: FilterCore,
    pub(crate) profile: Option<Vec<f32>>,
    rounds: u32,
    ledger: ResponseLedger,
}

impl ProfiledFilter {
    pub fn new(integration: &Integration) -> Self {
        ProfiledFilter {
            core: FilterCore::new(integration),
            profile: None,
            rounds: 0,
            ledger: ResponseLedger::new(integration.channels.len()),
        }
    }

    /// Sets the transfer profile. Values are clamped into [0, 1], NaN becomes 0.
    pub fn set_profile(&mut self, values: &[f32]) {
        self.profile = Some(values.iter().map(|v| clamp_unit(*v)).collect());
    }

    pub fn clear_profile(&mut self) {
        self.profile = None;
    }

    pub fn profile(&self) -> Option<&[f32]> {
        self.profile.as_deref()
    }

    /// Number of times the filter has been applied.
    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    /// Profile value at frequency bin `bin`, without the round exponent.
    pub fn profile_at(&self, bin: usize) -> f64 {
        match self.profile.as_deref() {
            Some(profile) if !profile.is_empty() => {
                profile[profile_index(bin, self.core.nf(), profile.len())] as f64
            }
            _ => 1.0,
        }
    }

    /// `Σ (1 - p²)` over the profile entries from the minimum index on.
    pub(crate) fn profile_parms(&self) -> f64 {
        let Some(profile) = self.profile.as_deref() else {
            return 0.0;
        };
        profile
            .iter()
            .skip(self.core.min_index())
            .map(|p| 1.0 - (*p as f64).powi(2))
            .sum()
    }
}

pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

impl Filter for ProfiledFilter {
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
        "P".to_string()
    }

    fn throughput_at(&self, bin: usize) -> f64 {
        self.profile_at(bin).powi(self.rounds as i32)
    }

    fn count_parms(&self) -> f64 {
        self.profile_parms()
    }

    fn configure(&mut self, settings: &FilterSettings) -> FilterResult<()> {
        if let Some(profile) = &settings.profile {
            self.set_profile(profile);
        }
        Ok(())
    }

    fn set_integration(&mut self, integration: &Integration) {
        self.core.bind(integration);
        self.rounds = 0;
        self.ledger.reset(integration.channels.len());
    }

    fn prepare(&mut self, _integration: &Integration) -> FilterResult<()> {
        self.rounds += 1;
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_throughput_is_profile_to_the_rounds() {
        let mut integration = Integration::new(1, 256, 0.01);
        integration.set_channel_signal(0, |t| (t as f32 * 0.2).sin());
        let mut filter = ProfiledFilter::new(&integration);
        filter.set_profile(&[1.0, 0.9, 0.5, 0.0]);
        assert_eq!(filter.throughput_at(40), 1.0);

        for r in 1..=3 {
            filter.filter(&mut integration).unwrap();
            assert_eq!(filter.rounds(), r);
            // bin 40 of 129 maps onto entry 1
            assert_relative_eq!(filter.throughput_at(40), 0.9f64.powi(r as i32), epsilon = 1e-6);
            assert_relative_eq!(filter.throughput_at(70), 0.5f64.powi(r as i32), epsilon = 1e-6);
            assert_eq!(filter.throughput_at(128), 0.0);
            assert_relative_eq!(filter.rejection_at(70), 1.0 - 0.5f64.powi(r as i32), epsilon = 1e-6);
        }
        assert_eq!(integration.history().len(), 3);
    }

    #[test]
    fn test_without_profile_everything_passes() {
        let mut integration = Integration::new(1, 100, 0.01);
        integration.point_crossing_time = 0.05;
        integration.set_channel_signal(0, |t| (t as f32).sqrt());
        let original = integration.channel_signal(0);

        let mut filter = ProfiledFilter::new(&integration);
        filter.filter(&mut integration).unwrap();

        assert!((0..=filter.core().nf()).all(|bin| filter.throughput_at(bin) == 1.0));
        assert_eq!(filter.point_source_throughput(), 1.0);
        assert_eq!(filter.count_parms(), 0.0);
        for (a, b) in original.iter().zip(integration.channel_signal(0)) {
            assert_relative_eq!(*a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_set_profile_clamps_values() {
        let integration = Integration::new(1, 16, 0.1);
        let mut filter = ProfiledFilter::new(&integration);
        filter.set_profile(&[1.5, -0.2, f32::NAN, 0.5]);
        assert_eq!(filter.profile(), Some(&[1.0, 0.0, 0.0, 0.5][..]));

        filter.clear_profile();
        assert_eq!(filter.profile(), None);
    }

    #[test]
    fn test_count_parms_indexes_profile_from_min_index() {
        let integration = Integration::new(1, 64, 0.1);
        let mut filter = ProfiledFilter::new(&integration);
        filter.set_profile(&[0.0, 0.5, 1.0, 0.0]);
        // entries 1 to 3: 0.75 + 0 + 1
        assert_relative_eq!(filter.count_parms(), 1.75);
    }

    #[test]
    fn test_configure_from_settings() {
        let integration = Integration::new(1, 64, 0.1);
        let settings = FilterSettings {
            profile: Some(vec![1.0, 0.25]),
            ..FilterSettings::default()
        };
        let filter = crate::filters::filter::FILTER_REGISTRY
            .read()
            .unwrap()
            .create("profiled", &integration, &settings)
            .unwrap();
        let profiled = filter.downcast_ref::<ProfiledFilter>().unwrap();
        assert_eq!(profiled.profile(), Some(&[1.0, 0.25][..]));
        assert_eq!(filter.id(), "P");
    }

    #[test]
    fn test_zero_stream_stays_zero() {
        let mut integration = Integration::new(2, 128, 0.01);
        let mut filter = ProfiledFilter::new(&integration);
        filter.set_profile(&[0.0, 0.3, 0.6]);
        filter.filter(&mut integration).unwrap();
        for c in 0..2 {
            assert!(integration.channel_signal(c).iter().all(|x| *x == 0.0));
        }
    }

    #[test]
    fn test_rebinding_starts_over_at_zero_rounds() {
        let mut first = Integration::new(1, 128, 0.01);
        let mut second = Integration::new(1, 128, 0.01);
        for integration in [&mut first, &mut second] {
            integration.set_channel_signal(0, |t| (t as f32 * 0.4).sin());
        }
        let mut filter = ProfiledFilter::new(&first);
        filter.set_profile(&[1.0, 0.5]);

        filter.filter(&mut first).unwrap();
        filter.filter(&mut first).unwrap();
        assert_eq!(filter.rounds(), 2);

        filter.filter(&mut second).unwrap();
        assert_eq!(filter.rounds(), 1);
        assert_relative_eq!(filter.throughput_at(60), 0.5, epsilon = 1e-6);
    }
}
