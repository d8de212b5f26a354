//! Frequency-domain filters for detector time streams.
//!
//! Every filter implements the `Filter` trait defined in the `filter` module. Filters are
//! bound to one integration at a time and remove part of each channel's signal, keeping the
//! integration's bookkeeping (degrees of freedom, channel responses) up to date.
//!
//! # Filter Implementations
//!
//! * **Kill**: Rejects explicit frequency ranges.
//! * **Profiled**: Applies an arbitrary transfer profile.
//! * **Dynamic**: Keeps one profile per channel, refined from the channel spectra.
//! * **Whitening**: Dynamic filter flattening outstanding spectral windows.
//! * **Compound**: Cascades several filters in one transform pass.

/// Cascade of member filters in one transform pass.
pub mod compound;

/// Binding, working buffers and FFT plans shared by all filters.
pub mod core;

/// Per-channel profiles updated from the channel spectra.
pub mod dynamic;

/// The `Filter` trait, the shared algorithm and the filter registry.
pub mod filter;

/// Rejection of explicit frequency ranges.
pub mod kill;

/// Arbitrary transfer profile, exponentiated by the number of applications.
pub mod profiled;

/// Bookkeeping of the response factors applied to channels.
pub mod response;

/// Spectral whitening source for dynamic filters.
pub mod whitening;
