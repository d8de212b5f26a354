//! # cancellable_loops
//!
//! Sequential and parallel loops that stop early when an abort flag is raised and
//! propagate the first error returned by the loop body.
//!
//! The parallel variant hands every rayon worker its own state, built once per worker by an
//! `init` closure. Callers use this to give each worker a private instance of an object that
//! must not be shared between threads, e.g. a filter that owns scratch buffers.
//!
//! ## Example
//!
//! ```
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use cancellable_loops::for_each_cancellable;
//!
//! let abort_flag = AtomicBool::new(false);
//! let mut sum = 0;
//!
//! let processed = for_each_cancellable(1..=10, &abort_flag, |i| {
//!     sum += i;
//!     if sum >= 15 {
//!         abort_flag.store(true, Ordering::Relaxed);
//!     }
//!     Ok::<(), String>(())
//! })
//! .unwrap();
//!
//! // 1 + 2 + 3 + 4 + 5 = 15
//! assert_eq!(processed, 5);
//! assert_eq!(sum, 15);
//! ```

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Executes a sequential loop that can be cancelled via an abort flag.
///
/// Items are processed in order until the iterator is exhausted, the abort flag is set, or
/// `func` returns an error. The error is returned unchanged.
///
/// # Returns
///
/// The number of items that were processed successfully.
pub fn for_each_cancellable<I, F, T, E>(iter: I, abort_flag: &AtomicBool, mut func: F) -> Result<usize, E>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Result<(), E>,
{
    let mut processed = 0;
    for item in iter {
        if abort_flag.load(Ordering::Relaxed) {
            break;
        }
        func(item)?;
        processed += 1;
    }
    Ok(processed)
}

/// Executes a parallel loop with per-worker state that can be cancelled via an abort flag.
///
/// `init` is called once for every rayon job split to build the state handed to `func`.
/// Once the abort flag is set, remaining items are skipped. The first error returned by
/// `func` stops the loop and is returned.
///
/// # Returns
///
/// The number of items that were processed successfully.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::AtomicBool;
/// use cancellable_loops::par_for_each_init_cancellable;
///
/// let abort_flag = AtomicBool::new(false);
/// let processed = par_for_each_init_cancellable(
///     0u32..64,
///     &abort_flag,
///     Vec::<u32>::new,
///     |scratch, i| {
///         scratch.clear();
///         scratch.push(i);
///         Ok::<(), String>(())
///     },
/// )
/// .unwrap();
///
/// assert_eq!(processed, 64);
/// ```
pub fn par_for_each_init_cancellable<I, S, INIT, F, E>(
    iter: I,
    abort_flag: &AtomicBool,
    init: INIT,
    func: F,
) -> Result<usize, E>
where
    I: IntoParallelIterator,
    I::Item: Send,
    INIT: Fn() -> S + Sync + Send,
    F: Fn(&mut S, I::Item) -> Result<(), E> + Sync + Send,
    E: Send,
{
    let processed = AtomicUsize::new(0);
    iter.into_par_iter().try_for_each_init(init, |state, item| {
        if abort_flag.load(Ordering::Relaxed) {
            return Ok(());
        }
        func(state, item)?;
        processed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    })?;
    Ok(processed.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_loop_propagates_errors() {
        let abort_flag = AtomicBool::new(false);
        let result = for_each_cancellable(0..10, &abort_flag, |i| {
            if i == 3 {
                Err(format!("failed at {i}"))
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("failed at 3".to_string()));
    }

    #[test]
    fn parallel_loop_skips_everything_when_aborted() {
        let abort_flag = AtomicBool::new(true);
        let processed =
            par_for_each_init_cancellable(0..100, &abort_flag, || 0usize, |count, _| {
                *count += 1;
                Ok::<(), ()>(())
            })
            .unwrap();
        assert_eq!(processed, 0);
    }

    #[test]
    fn parallel_loop_returns_first_error() {
        let abort_flag = AtomicBool::new(false);
        let result = par_for_each_init_cancellable(0..100, &abort_flag, || (), |_, i| {
            if i == 42 {
                Err(i)
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(42));
    }
}
