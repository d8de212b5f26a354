//! This module provides the `Filter` trait, the shared per-channel filtering algorithm and the
//! registry that creates filters from their configuration tags.
//!
//! A filter removes part of each channel's time stream in the frequency domain. Besides the
//! samples, it updates two kinds of bookkeeping that the rest of the reduction relies on:
//! the degrees of freedom it consumed (in the integration's `Dependents` ledger) and its
//! response (point-source throughput and noise whitening on every channel).

use crate::config::FilterSettings;
use crate::dependents::Dependents;
use crate::error::{FilterError, FilterResult};
use crate::filters::compound::CompoundFilter;
use crate::filters::core::FilterCore;
use crate::filters::kill::KillFilter;
use crate::filters::profiled::ProfiledFilter;
use crate::filters::response::Response;
use crate::filters::whitening::WhiteningFilter;
use crate::integration::Integration;
use crate::math_tools::gaussian_response;
use downcast_rs::Downcast;
use once_cell::sync::Lazy;
use realfft::num_complex::Complex32;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt::Debug;
use std::sync::RwLock;

/// The `Filter` trait defines the structure and behavior of a time-stream filter.
///
/// Filters must implement:
/// - `core`/`core_mut` to expose their shared buffers and binding.
/// - `name` (registry tag, also the key of the dependents ledger) and `id` (short tag appended
///   to the integration's processing history).
/// - `throughput_at` to describe the transfer function per frequency bin.
/// - `count_parms` to report the degrees of freedom consumed per channel.
///
/// The remaining methods have default implementations that follow the common algorithm:
/// load, level, transform, reject, re-level and subtract. Filters override the hooks
/// (`prepare`, `update_response`, `reject_channel`, `filter_channel`) where their state needs it and call the
/// free functions of this module to fall back to the shared behavior.
///
/// To make a filter available to configuration, derive `Clone` and `Debug`, provide
/// `fn new(integration: &Integration) -> Self`, add the `register_filter` attribute and list
/// the type in [`FilterRegistry::builtin`].
///
/// **Example**:
/// ```rust,ignore
/// #[register_filter]
/// #[derive(Clone, Debug)]
/// pub struct AllPassFilter {
///     core: FilterCore,
/// }
///
/// impl AllPassFilter {
///     pub fn new(integration: &Integration) -> Self {
///         AllPassFilter { core: FilterCore::new(integration) }
///     }
/// }
///
/// impl Filter for AllPassFilter {
///     fn core(&self) -> &FilterCore { &self.core }
///     fn core_mut(&mut self) -> &mut FilterCore { &mut self.core }
///     fn name(&self) -> &'static str { Self::NAME }
///     fn id(&self) -> String { "A".to_string() }
///     fn throughput_at(&self, _bin: usize) -> f64 { 1.0 }
///     fn count_parms(&self) -> f64 { 0.0 }
/// }
/// ```
pub trait Filter: Send + Sync + Debug + CloneBoxedFilter + Downcast {
    fn core(&self) -> &FilterCore;

    fn core_mut(&mut self) -> &mut FilterCore;

    /// Registry tag of the filter. Also keys the integration's dependents ledger.
    fn name(&self) -> &'static str;

    /// Short tag appended to the integration's processing history.
    fn id(&self) -> String;

    /// Fraction of the signal amplitude passed at frequency bin `bin`, in [0, 1].
    fn throughput_at(&self, bin: usize) -> f64;

    /// Fraction of the signal amplitude removed at frequency bin `bin`.
    fn rejection_at(&self, bin: usize) -> f64 {
        1.0 - self.throughput_at(bin)
    }

    /// Degrees of freedom consumed per channel by one application of the filter.
    fn count_parms(&self) -> f64;

    /// Applies configuration options. Called once after construction by the registry.
    fn configure(&mut self, _settings: &FilterSettings) -> FilterResult<()> {
        Ok(())
    }

    /// Binds the filter to `integration`, resizing buffers if needed.
    fn set_integration(&mut self, integration: &Integration) {
        self.core_mut().bind(integration);
    }

    /// Called once at the start of every [`Filter::filter`] call, before any channel.
    fn prepare(&mut self, _integration: &Integration) -> FilterResult<()> {
        Ok(())
    }

    /// Called with the forward transform of `channel` before the transfer function is
    /// queried, for filters whose response depends on the data.
    fn update_response(&mut self, _channel: usize, _spectrum: &[Complex32]) {}

    /// Removes the rejected signal from a single channel without touching the channel's
    /// response factors.
    fn reject_channel(&mut self, integration: &mut Integration, channel: usize) -> FilterResult<()> {
        filter_channel_default(self, integration, channel)
    }

    /// Filters a single channel of `integration` and books the filter's response on it.
    fn filter_channel(&mut self, integration: &mut Integration, channel: usize) -> FilterResult<()> {
        self.reject_channel(integration, channel)
    }

    /// Filters every channel of the filter's channel set and books the consumed degrees of
    /// freedom.
    fn filter(&mut self, integration: &mut Integration) -> FilterResult<()> {
        filter_integration(self, integration)
    }

    /// First frequency bin above the high-pass cutoff.
    fn min_index(&self) -> usize {
        self.core().min_index()
    }

    /// Fraction of a Gaussian point source (of FWHM equal to the beam-crossing time) that
    /// survives the filter.
    fn point_source_throughput(&self) -> f64 {
        point_source_throughput(self)
    }

    /// Mean-square throughput above the high-pass cutoff.
    fn noise_whitening(&self) -> f64 {
        noise_whitening(self)
    }

    /// The response factors this filter contributes to a channel.
    fn response(&self) -> Response {
        Response {
            noise_whitening: self.noise_whitening(),
            point_throughput: self.point_source_throughput(),
        }
    }
}
downcast_rs::impl_downcast!(Filter);

/// Clones a filter behind a trait object, e.g. to give every worker its own instance.
pub trait CloneBoxedFilter {
    fn clone_box(&self) -> Box<dyn Filter>;
}

impl<T> CloneBoxedFilter for T
where
    T: 'static + Filter + Clone,
{
    fn clone_box(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Filter> {
    fn clone(&self) -> Box<dyn Filter> {
        self.as_ref().clone_box()
    }
}

/// Filters that can be created from a registry tag. Usually implemented through the
/// `register_filter` attribute.
pub trait RegisteredFilter: Filter + Sized {
    const NAME: &'static str;

    fn create(integration: &Integration, settings: &FilterSettings) -> FilterResult<Box<dyn Filter>>;
}

/// Creates a configured filter bound to an integration.
pub type FilterFactory = fn(&Integration, &FilterSettings) -> FilterResult<Box<dyn Filter>>;

/// A registry mapping filter tags to factories.
///
/// **Example**:
/// ```rust
/// use timestream_filters::config::FilterSettings;
/// use timestream_filters::filters::filter::FILTER_REGISTRY;
/// use timestream_filters::integration::Integration;
///
/// let integration = Integration::new(4, 512, 0.01);
/// let registry = FILTER_REGISTRY.read().unwrap();
/// let filter = registry
///     .create("kill", &integration, &FilterSettings::default())
///     .unwrap();
/// assert_eq!(filter.id(), "K");
/// ```
#[derive(Debug, Default)]
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        FilterRegistry::default()
    }

    /// A registry of all filters provided by this crate.
    pub fn builtin() -> Self {
        let mut registry = FilterRegistry::new();
        registry.register::<KillFilter>();
        registry.register::<ProfiledFilter>();
        registry.register::<WhiteningFilter>();
        registry.register::<CompoundFilter>();
        registry
    }

    /// Registers the filter type `F` under its tag, replacing any previous entry.
    pub fn register<F: RegisteredFilter>(&mut self) {
        self.register_factory(F::NAME, F::create);
    }

    pub fn register_factory(&mut self, name: &str, factory: FilterFactory) {
        if self.factories.insert(name.to_string(), factory).is_some() {
            log::debug!("replaced filter factory '{name}'");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// The registered tags in alphabetical order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Creates the filter registered as `name`, bound to `integration` and configured from
    /// `settings`.
    pub fn create(
        &self,
        name: &str,
        integration: &Integration,
        settings: &FilterSettings,
    ) -> FilterResult<Box<dyn Filter>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| FilterError::UnknownFilter(name.to_string()))?;
        factory(integration, settings)
    }
}

/// A global, thread-safe filter registry holding the built-in filters.
pub static FILTER_REGISTRY: Lazy<RwLock<FilterRegistry>> =
    Lazy::new(|| RwLock::new(FilterRegistry::builtin()));

/// Runs `filter` over every channel of its channel set and books the consumed degrees of
/// freedom into the integration's dependents ledger keyed by the filter's name.
///
/// The cost charged to each channel is the filter's `count_parms` after filtering that
/// channel. The total is spread over the usable frames in proportion to their relative
/// weights.
pub fn filter_integration<F: Filter + ?Sized>(
    filter: &mut F,
    integration: &mut Integration,
) -> FilterResult<()> {
    if integration.size() == 0 {
        return Err(FilterError::EmptyIntegration);
    }
    if filter.core().integration_id() != integration.id() {
        log::debug!("binding filter '{}' to integration {}", filter.name(), integration.id());
        filter.set_integration(integration);
    }
    let channels = filter.core().channels().to_vec();
    if let Some(&c) = channels.iter().find(|&&c| c >= integration.channels.len()) {
        return Err(FilterError::ChannelOutOfRange(c));
    }

    filter.prepare(integration)?;
    integration.append_history(&filter.id());

    let mut parms = integration.take_dependents(filter.name());
    let result = book_channels(filter, integration, &channels, &mut parms);
    integration.restore_dependents(parms);

    let total = result?;
    log::info!(
        "{}: filtered {} channels, {:.1} parms",
        filter.id(),
        channels.len(),
        total
    );
    Ok(())
}

fn book_channels<F: Filter + ?Sized>(
    filter: &mut F,
    integration: &mut Integration,
    channels: &[usize],
    parms: &mut Dependents,
) -> FilterResult<f64> {
    parms.clear_frames(&mut integration.frames);

    let mut total = 0.0;
    for &c in channels {
        parms.clear_channel(&mut integration.channels, c);
        filter.filter_channel(integration, c)?;
        let dp = filter.count_parms();
        parms.add_channel(c, dp);
        total += dp;
    }

    let sum_w: f64 = integration
        .frames
        .iter()
        .flatten()
        .filter(|frame| frame.is_usable())
        .map(|frame| frame.relative_weight as f64)
        .sum();
    if sum_w > 0.0 {
        for (t, frame) in integration.frames.iter().enumerate() {
            if let Some(frame) = frame.as_ref().filter(|frame| frame.is_usable()) {
                parms.add_frame(t, total * frame.relative_weight as f64 / sum_w);
            }
        }
    }

    parms.apply(&mut integration.channels, channels, &mut integration.frames);
    Ok(total)
}

/// The shared per-channel algorithm: load, level, reject (direct or via FFT), re-level the
/// rejected signal and subtract it from the channel.
pub fn filter_channel_default<F: Filter + ?Sized>(
    filter: &mut F,
    integration: &mut Integration,
    channel: usize,
) -> FilterResult<()> {
    let core = filter.core_mut();
    core.load_time_stream(integration, channel);
    core.level();

    if core.points() <= 0.0 {
        core.clear_rejected();
        return Ok(());
    }

    if core.is_dft() {
        dft_filter(filter, channel);
    } else {
        fft_filter(filter, channel)?;
    }

    let core = filter.core_mut();
    core.level_rejected();
    core.remove_rejected(integration, channel);
    Ok(())
}

/// Computes the rejected signal of the loaded channel with a full real transform.
pub fn fft_filter<F: Filter + ?Sized>(filter: &mut F, channel: usize) -> FilterResult<()> {
    filter.core_mut().forward()?;

    let mut spectrum = std::mem::take(&mut filter.core_mut().spectrum);
    filter.update_response(channel, &spectrum);

    spectrum[0] = Complex32::new(0.0, 0.0);
    for (bin, value) in spectrum.iter_mut().enumerate().skip(1) {
        *value *= filter.rejection_at(bin) as f32;
    }

    let core = filter.core_mut();
    let result = core.inverse(&mut spectrum);
    core.spectrum = spectrum;
    result
}

/// Computes the rejected signal of the loaded channel by direct summation over the rejected
/// bins only. Cheaper than the FFT when few bins are rejected.
///
/// Matches [`fft_filter`] up to rounding, except that `update_response` is not called.
pub fn dft_filter<F: Filter + ?Sized>(filter: &mut F, _channel: usize) {
    let nf = filter.core().nf();
    let rejected: Vec<(usize, f64)> = (1..=nf)
        .map(|bin| (bin, filter.rejection_at(bin)))
        .filter(|(_, rejection)| *rejection != 0.0)
        .collect();

    let core = filter.core_mut();
    let nt = core.nt();
    let n = core.binding().frames.min(nt);
    core.filtered.fill(0.0);

    for (bin, rejection) in rejected {
        let (sin_step, cos_step) = (2.0 * PI * bin as f64 / nt as f64).sin_cos();

        let (mut c, mut s) = (1.0f64, 0.0f64);
        let (mut sum_c, mut sum_s) = (0.0f64, 0.0f64);
        for x in &core.data[..n] {
            sum_c += *x as f64 * c;
            sum_s += *x as f64 * s;
            (c, s) = (c * cos_step - s * sin_step, s * cos_step + c * sin_step);
        }

        // Nyquist appears once in the real spectrum, all other bins twice.
        let norm = if bin == nf { 1.0 } else { 2.0 } * rejection / nt as f64;
        let (a, b) = (norm * sum_c, norm * sum_s);

        let (mut c, mut s) = (1.0f64, 0.0f64);
        for y in &mut core.filtered[..n] {
            *y += (a * c + b * s) as f32;
            (c, s) = (c * cos_step - s * sin_step, s * cos_step + c * sin_step);
        }
    }
}

/// Fraction of a Gaussian point source surviving `filter`, weighting the throughput of each
/// bin by the source spectrum. Bins below the high-pass cutoff count as unfiltered.
pub fn point_source_throughput<F: Filter + ?Sized>(filter: &F) -> f64 {
    let core = filter.core();
    let crossing_time = core.binding().point_crossing_time;
    let min_index = filter.min_index();

    let (mut sum, mut norm) = (0.0, 0.0);
    for bin in 0..=core.nf() {
        let g = gaussian_response(bin as f64 * core.df(), crossing_time);
        let throughput = if bin < min_index {
            1.0
        } else {
            filter.throughput_at(bin)
        };
        sum += g * throughput;
        norm += g;
    }

    if norm > 0.0 {
        (sum / norm).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Mean-square throughput of `filter` over the bins above the high-pass cutoff.
pub fn noise_whitening<F: Filter + ?Sized>(filter: &F) -> f64 {
    let nf = filter.core().nf();
    let min_index = filter.min_index();
    if min_index > nf {
        return 1.0;
    }
    let sum: f64 = (min_index..=nf)
        .map(|bin| filter.throughput_at(bin).powi(2))
        .sum();
    sum / (nf - min_index + 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::kill::KillFilter;
    use crate::filters::profiled::ProfiledFilter;
    use approx::assert_relative_eq;

    #[test]
    fn test_builtin_registry() {
        let registry = FilterRegistry::builtin();
        assert_eq!(registry.names(), vec!["compound", "kill", "profiled", "whitening"]);
    }

    #[test]
    fn test_registry_creates_configured_filter() {
        let integration = Integration::new(2, 1024, 0.01);
        let mut settings = FilterSettings::default();
        settings.kill.bands = vec!["1.0:2.0".to_string()];

        let registry = FILTER_REGISTRY.read().unwrap();
        let filter = registry.create("kill", &integration, &settings).unwrap();
        let kill = filter.downcast_ref::<KillFilter>().unwrap();

        // df = 1 / 10.24 Hz: bins 11 through 20
        assert_eq!(kill.components(), 10);
        assert_eq!(filter.core().integration_id(), integration.id());
    }

    #[test]
    fn test_unknown_filter_is_an_error() {
        let integration = Integration::new(1, 16, 0.1);
        let result = FILTER_REGISTRY.read().unwrap().create(
            "motion",
            &integration,
            &FilterSettings::default(),
        );
        assert!(matches!(result, Err(FilterError::UnknownFilter(name)) if name == "motion"));
    }

    #[test]
    fn test_filter_records_history_and_dependents() {
        let mut integration = Integration::new(3, 256, 0.01);
        for c in 0..3 {
            integration.set_channel_signal(c, |t| (t as f32 * 0.1 * (c + 1) as f32).sin());
        }
        if let Some(frame) = integration.frames[7].as_mut() {
            frame.relative_weight = 3.0;
        }
        integration.frames[9] = None;

        let mut filter = KillFilter::new(&integration);
        let df = filter.core().df();
        filter.kill(10.0 * df, 2.0 * df);
        let dp = filter.count_parms();
        assert_eq!(dp, 5.0);

        for _ in 0..2 {
            filter.filter(&mut integration).unwrap();
        }

        assert_eq!(integration.history(), &["K".to_string(), "K".to_string()]);
        for channel in &integration.channels {
            assert_relative_eq!(channel.dependents, dp);
        }
        let frame_total: f64 = integration.frames.iter().flatten().map(|f| f.dependents).sum();
        assert_relative_eq!(frame_total, 3.0 * dp, epsilon = 1e-9);

        let parms = integration.dependents("kill").unwrap();
        // 254 frames of weight 1 plus one of weight 3
        assert_relative_eq!(parms.for_frame(7), 3.0 * 3.0 * dp / 257.0, epsilon = 1e-12);
        assert_eq!(parms.for_frame(9), 0.0);
    }

    #[test]
    fn test_empty_integration_is_an_error() {
        let mut integration = Integration::new(1, 0, 0.1);
        let mut filter = ProfiledFilter::new(&integration);
        assert!(matches!(
            filter.filter(&mut integration),
            Err(FilterError::EmptyIntegration)
        ));
    }

    #[test]
    fn test_filter_rebinds_to_new_integration() {
        let a = Integration::new(1, 128, 0.01);
        let mut b = Integration::new(2, 300, 0.01);
        let mut filter = ProfiledFilter::new(&a);

        filter.filter(&mut b).unwrap();
        assert_eq!(filter.core().integration_id(), b.id());
        assert_eq!(filter.core().nt(), 512);
        assert_eq!(filter.core().channels(), &[0, 1]);
    }

    #[test]
    fn test_noise_whitening_of_kill_filter() {
        let integration = Integration::new(1, 256, 0.01);
        let mut filter = KillFilter::new(&integration);
        assert_relative_eq!(filter.noise_whitening(), 1.0);

        let df = filter.core().df();
        // 4 of the 128 bins from 1 to Nyquist
        filter.kill(20.5 * df, 1.6 * df);
        assert_eq!(filter.components(), 4);
        assert_relative_eq!(filter.noise_whitening(), 124.0 / 128.0);
    }
}
