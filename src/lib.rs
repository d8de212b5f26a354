//! # timestream-filters
//!
//! Frequency-domain filters for the time streams of multi-channel detector arrays, as used
//! in the iterative reduction of submillimetre camera data.
//!
//! An [`Integration`](integration::Integration) is a contiguous block of frames sampled at a
//! fixed interval. A filter bound to it transforms every channel, rejects part of the
//! spectrum, subtracts the rejected signal and books what it did: the degrees of freedom it
//! consumed in the integration's dependents ledger, and its point-source throughput and
//! noise whitening on every channel.
//!
//! ```rust
//! use timestream_filters::filters::filter::Filter;
//! use timestream_filters::filters::kill::KillFilter;
//! use timestream_filters::integration::Integration;
//!
//! let mut integration = Integration::new(1, 256, 0.01);
//! integration.set_channel_signal(0, |t| (2.0 * std::f32::consts::PI * t as f32 / 25.6).sin());
//!
//! let mut filter = KillFilter::new(&integration);
//! filter.kill(3.90625, 0.2);
//! filter.filter(&mut integration).unwrap();
//!
//! assert!(integration.channel_signal(0).iter().all(|x| x.abs() < 1e-3));
//! ```

pub mod config;
pub mod dependents;
pub mod error;
pub mod filters;
pub mod integration;
pub mod math_tools;
pub mod pipeline;

pub use error::{FilterError, FilterResult};
