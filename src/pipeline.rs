//! Batch filtering of many integrations.
//!
//! A filter instance owns its working buffers, so it handles one channel of one integration
//! at a time. To filter integrations in parallel, every rayon worker gets its own clone of a
//! prototype filter; the clone rebinds itself to each integration it is handed.

use crate::error::FilterResult;
use crate::filters::filter::Filter;
use crate::integration::Integration;
use cancellable_loops::{for_each_cancellable, par_for_each_init_cancellable};
use rayon::prelude::*;
use std::sync::atomic::AtomicBool;

/// Filters all `integrations` in parallel with clones of `prototype`.
///
/// Integrations not yet started when `abort_flag` is raised are left untouched. The first
/// error stops the batch and is returned.
///
/// # Returns
/// The number of integrations filtered.
pub fn filter_integrations(
    prototype: &dyn Filter,
    integrations: &mut [Integration],
    abort_flag: &AtomicBool,
) -> FilterResult<usize> {
    log::info!(
        "filtering {} integrations with '{}'",
        integrations.len(),
        prototype.name()
    );
    par_for_each_init_cancellable(
        integrations.par_iter_mut(),
        abort_flag,
        || prototype.clone_box(),
        |filter, integration| filter.filter(integration),
    )
}

/// Filters all `integrations` in order with the single instance `filter`.
pub fn filter_sequentially(
    filter: &mut dyn Filter,
    integrations: &mut [Integration],
    abort_flag: &AtomicBool,
) -> FilterResult<usize> {
    for_each_cancellable(integrations.iter_mut(), abort_flag, |integration| {
        filter.filter(integration)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FilterError;
    use crate::filters::kill::KillFilter;
    use crate::filters::profiled::ProfiledFilter;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn line_integrations(count: usize) -> Vec<Integration> {
        (0..count)
            .map(|i| {
                let mut integration = Integration::new(2, 256, 0.01);
                for c in 0..2 {
                    integration.set_channel_signal(c, |t| {
                        (1.0 + i as f32) * (2.0 * PI * (10 * t) as f32 / 256.0).sin()
                    });
                }
                integration
            })
            .collect()
    }

    /// Integrations with the same signal but distinct identities.
    fn identical_integrations(count: usize) -> Vec<Integration> {
        (0..count)
            .map(|_| {
                let mut integration = Integration::new(2, 128, 0.01);
                integration.point_crossing_time = 0.05;
                for c in 0..2 {
                    integration.set_channel_signal(c, |t| {
                        (t as f32 * 0.7).sin() + 0.3 * (t as f32 * 2.1).cos()
                    });
                }
                integration
            })
            .collect()
    }

    fn half_profile(integration: &Integration) -> ProfiledFilter {
        let mut filter = ProfiledFilter::new(integration);
        filter.set_profile(&[1.0, 0.5, 0.5, 0.5]);
        filter
    }

    fn line_filter(integration: &Integration) -> KillFilter {
        let mut filter = KillFilter::new(integration);
        let df = filter.core().df();
        filter.kill(10.0 * df, 0.5 * df);
        filter
    }

    fn max_abs(integration: &Integration, channel: usize) -> f32 {
        integration
            .channel_signal(channel)
            .iter()
            .fold(0.0f32, |acc, x| acc.max(x.abs()))
    }

    #[test]
    fn test_parallel_batch() {
        let mut integrations = line_integrations(8);
        let prototype = line_filter(&integrations[0]);
        let abort_flag = AtomicBool::new(false);

        let processed = filter_integrations(&prototype, &mut integrations, &abort_flag).unwrap();

        assert_eq!(processed, 8);
        for integration in &integrations {
            assert_eq!(integration.history(), &["K".to_string()]);
            for c in 0..2 {
                assert!(max_abs(integration, c) < 0.05);
                assert_eq!(integration.channels[c].dependents, 1.0);
            }
        }
        // the prototype itself is never run
        assert_eq!(prototype.core().integration_id(), integrations[0].id());
    }

    #[test]
    fn test_aborted_batch_leaves_integrations_untouched() {
        let mut integrations = line_integrations(4);
        let prototype = line_filter(&integrations[0]);
        let abort_flag = AtomicBool::new(true);

        let processed = filter_integrations(&prototype, &mut integrations, &abort_flag).unwrap();

        assert_eq!(processed, 0);
        assert!(integrations.iter().all(|i| i.history().is_empty()));
    }

    #[test]
    fn test_batch_returns_first_error() {
        let mut integrations = line_integrations(3);
        integrations.push(Integration::new(2, 0, 0.01));
        let mut filter = line_filter(&integrations[0]);
        let abort_flag = AtomicBool::new(false);

        let result = filter_integrations(&filter, &mut integrations, &abort_flag);
        assert!(matches!(result, Err(FilterError::EmptyIntegration)));

        let result = filter_sequentially(&mut filter, &mut integrations, &abort_flag);
        assert!(matches!(result, Err(FilterError::EmptyIntegration)));
        assert!(integrations[..3].iter().all(|i| !i.history().is_empty()));
    }

    #[test]
    fn test_reused_filter_gives_same_response_on_every_integration() {
        let mut integrations = identical_integrations(2);
        let mut filter = half_profile(&integrations[0]);
        let abort_flag = AtomicBool::new(false);

        let processed = filter_sequentially(&mut filter, &mut integrations, &abort_flag).unwrap();
        assert_eq!(processed, 2);
        assert_eq!(filter.rounds(), 1);

        let (first, second) = (&integrations[0], &integrations[1]);
        for c in 0..2 {
            let (a, b) = (&first.channels[c], &second.channels[c]);
            assert!(a.noise_whitening < 1.0);
            assert_relative_eq!(a.noise_whitening, b.noise_whitening);
            assert_relative_eq!(a.direct_filtering, b.direct_filtering);
            assert_relative_eq!(a.dependents, b.dependents);
            for (x, y) in first.channel_signal(c).iter().zip(second.channel_signal(c)) {
                assert_relative_eq!(*x, y, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_parallel_response_does_not_depend_on_scheduling() {
        let mut integrations = identical_integrations(32);
        let prototype = half_profile(&integrations[0]);
        let abort_flag = AtomicBool::new(false);

        filter_integrations(&prototype, &mut integrations, &abort_flag).unwrap();

        let expected = integrations[0].channels[0].noise_whitening;
        assert!(expected < 1.0);
        for integration in &integrations {
            assert_eq!(integration.history(), &["P".to_string()]);
            for channel in &integration.channels {
                assert_relative_eq!(channel.noise_whitening, expected);
            }
        }
    }
}
