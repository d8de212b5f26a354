//! Cascade of filters applied within a single transform pass.

use crate::config::FilterSettings;
use crate::error::{FilterError, FilterResult};
use crate::filters::core::FilterCore;
use crate::filters::filter::{Filter, RegisteredFilter, FILTER_REGISTRY};
use crate::filters::response::ResponseLedger;
use crate::integration::Integration;
use filter_macros::register_filter;
use realfft::num_complex::Complex32;
use std::sync::PoisonError;

/// Runs an ordered list of member filters as one filter.
///
/// With a single member the compound delegates the rejection to it. Otherwise each channel
/// is transformed once; every member in turn rejects its share of what the previous members
/// passed, and the sum of the rejected parts is transformed back and subtracted. Either way
/// the combined response is booked on the channel by the compound itself.
///
/// All members must be bound to the integration of the compound, since they share its
/// frequency grid.
///
/// With an ordering configured, the member list is rebuilt from it at the start of every
/// [`Filter::filter`] call: members are looked up by name and reused, missing ones are created
/// through the filter registry from the compound's settings.
#[register_filter]
#[derive(Clone, Debug)]
pub struct CompoundFilter {
    core: FilterCore,
    members: Vec<Box<dyn Filter>>,
    ordering: Option<Vec<String>>,
    settings: FilterSettings,
    accumulator: Vec<Complex32>,
    ledger: ResponseLedger,
}

impl CompoundFilter {
    pub fn new(integration: &Integration) -> Self {
        CompoundFilter {
            core: FilterCore::new(integration),
            members: Vec::new(),
            ordering: None,
            settings: FilterSettings::default(),
            accumulator: Vec::new(),
            ledger: ResponseLedger::new(integration.channels.len()),
        }
    }

    fn check_binding(&self, member: &dyn Filter) -> FilterResult<()> {
        let expected = self.core.integration_id();
        let found = member.core().integration_id();
        if expected != found {
            return Err(FilterError::IntegrationMismatch {
                name: member.name().to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Appends a member filter.
    ///
    /// # Errors
    /// `IntegrationMismatch` if the member is bound to another integration.
    pub fn add(&mut self, member: Box<dyn Filter>) -> FilterResult<()> {
        self.check_binding(member.as_ref())?;
        self.members.push(member);
        Ok(())
    }

    /// Replaces the member at `index`, or appends it if `index` is the member count.
    pub fn set(&mut self, index: usize, member: Box<dyn Filter>) -> FilterResult<()> {
        self.check_binding(member.as_ref())?;
        match index.cmp(&self.members.len()) {
            std::cmp::Ordering::Less => self.members[index] = member,
            std::cmp::Ordering::Equal => self.members.push(member),
            std::cmp::Ordering::Greater => {
                return Err(FilterError::InvalidParameter(format!(
                    "member index {index} beyond {} members",
                    self.members.len()
                )))
            }
        }
        Ok(())
    }

    /// Removes the first member named `name`.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Filter>> {
        let index = self.members.iter().position(|m| m.name() == name)?;
        Some(self.members.remove(index))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.iter().any(|m| m.name() == name)
    }

    pub fn members(&self) -> &[Box<dyn Filter>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn member(&self, name: &str) -> Option<&dyn Filter> {
        self.members
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    pub fn member_mut(&mut self, name: &str) -> Option<&mut dyn Filter> {
        for member in self.members.iter_mut() {
            if member.name() == name {
                return Some(member.as_mut());
            }
        }
        None
    }

    /// The first member of concrete type `T`.
    pub fn member_as<T: Filter>(&self) -> Option<&T> {
        self.members.iter().find_map(|m| (**m).downcast_ref::<T>())
    }

    pub fn member_as_mut<T: Filter>(&mut self) -> Option<&mut T> {
        self.members
            .iter_mut()
            .find_map(|m| (**m).downcast_mut::<T>())
    }

    pub fn ordering(&self) -> Option<&[String]> {
        self.ordering.as_deref()
    }

    /// Sets the member names, in order, that the next [`CompoundFilter::update`] arranges.
    pub fn set_ordering(&mut self, ordering: Option<Vec<String>>) {
        self.ordering = ordering;
    }

    /// Rebuilds the member list from the configured ordering. Without an ordering the members
    /// are left as they are.
    ///
    /// # Errors
    /// `UnknownFilter` for names without a registered filter, `InvalidParameter` for a
    /// compound nested in itself.
    pub fn update(&mut self, integration: &Integration) -> FilterResult<()> {
        let Some(ordering) = self.ordering.clone() else {
            return Ok(());
        };

        let mut previous = std::mem::take(&mut self.members);
        let mut members = Vec::with_capacity(ordering.len());
        let registry = FILTER_REGISTRY.read().unwrap_or_else(PoisonError::into_inner);

        for name in &ordering {
            let member = if name == Self::NAME {
                Err(FilterError::InvalidParameter(
                    "a compound filter cannot contain a compound filter".to_string(),
                ))
            } else if let Some(index) = previous.iter().position(|m| m.name() == name.as_str()) {
                Ok(previous.remove(index))
            } else {
                log::debug!("compound filter creating member '{name}'");
                registry.create(name, integration, &self.settings)
            };
            match member {
                Ok(member) => members.push(member),
                Err(err) => {
                    members.append(&mut previous);
                    self.members = members;
                    return Err(err);
                }
            }
        }

        for dropped in &previous {
            log::debug!("compound filter dropped member '{}'", dropped.name());
        }
        self.members = members;
        Ok(())
    }

    /// One forward transform, the members' rejections applied in order, one inverse
    /// transform of the accumulated rejected signal.
    fn cascade(&mut self, channel: usize) -> FilterResult<()> {
        self.core.forward()?;
        let mut signal = std::mem::take(&mut self.core.spectrum);
        signal[0] = Complex32::new(0.0, 0.0);

        let mut rejected = std::mem::take(&mut self.accumulator);
        rejected.clear();
        rejected.resize(signal.len(), Complex32::new(0.0, 0.0));

        for member in self.members.iter_mut() {
            member.update_response(channel, &signal);
            for (bin, (s, r)) in signal.iter_mut().zip(rejected.iter_mut()).enumerate().skip(1) {
                let rejection = member.rejection_at(bin) as f32;
                *r += *s * rejection;
                *s *= 1.0 - rejection;
            }
        }

        let result = self.core.inverse(&mut rejected);
        self.core.spectrum = signal;
        self.accumulator = rejected;
        result
    }
}

impl Filter for CompoundFilter {
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
        let ids: Vec<String> = self.members.iter().map(|m| m.id()).collect();
        format!("F({})", ids.join(":"))
    }

    fn throughput_at(&self, bin: usize) -> f64 {
        let mut throughput = 1.0;
        for member in &self.members {
            throughput *= member.throughput_at(bin);
            if throughput == 0.0 {
                return 0.0;
            }
        }
        throughput
    }

    /// Sum of the members' rejections from the minimum index up to (excluding) Nyquist.
    ///
    /// Unlike the throughput, which multiplies, the cost adds across members: bins rejected
    /// by more than one member are counted more than once.
    fn count_parms(&self) -> f64 {
        let (from, to) = (self.min_index(), self.core.nf());
        self.members
            .iter()
            .map(|m| (from..to).map(|bin| m.rejection_at(bin)).sum::<f64>())
            .sum()
    }

    fn configure(&mut self, settings: &FilterSettings) -> FilterResult<()> {
        self.settings = settings.clone();
        self.ordering = settings.ordering.clone();
        Ok(())
    }

    fn set_integration(&mut self, integration: &Integration) {
        self.core.bind(integration);
        for member in self.members.iter_mut() {
            member.set_integration(integration);
        }
        self.ledger.reset(integration.channels.len());
    }

    fn prepare(&mut self, integration: &Integration) -> FilterResult<()> {
        self.update(integration)?;
        for member in &self.members {
            self.check_binding(member.as_ref())?;
        }
        for member in self.members.iter_mut() {
            member.prepare(integration)?;
        }
        Ok(())
    }

    fn update_response(&mut self, channel: usize, spectrum: &[Complex32]) {
        for member in self.members.iter_mut() {
            member.update_response(channel, spectrum);
        }
    }

    fn reject_channel(&mut self, integration: &mut Integration, channel: usize) -> FilterResult<()> {
        match self.members.len() {
            0 => return Ok(()),
            1 => return self.members[0].reject_channel(integration, channel),
            _ => {}
        }

        self.core.load_time_stream(integration, channel);
        self.core.level();
        if self.core.points() > 0.0 {
            self.cascade(channel)?;
            self.core.level_rejected();
            self.core.remove_rejected(integration, channel);
        } else {
            log::warn!("channel {channel} has no valid samples to filter");
            self.core.clear_rejected();
        }
        Ok(())
    }

    /// The compound books its combined response on the channel whatever the member count, so
    /// the factor applied by a previous call is divided out even after members were added or
    /// dropped. Members' own response ledgers are not used.
    fn filter_channel(&mut self, integration: &mut Integration, channel: usize) -> FilterResult<()> {
        self.ledger.discount(&mut integration.channels[channel]);
        self.reject_channel(integration, channel)?;
        let response = self.response();
        self.ledger
            .reapply(&mut integration.channels[channel], response);
        Ok(())
    }
}
