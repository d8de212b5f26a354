//! Error types for time-stream filtering.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by filters and their configuration.
///
/// Only configuration problems are errors. Degenerate data (dead channels, missing cutoff)
/// is handled with fallbacks inside the filters.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("filter '{name}' is bound to integration {found}, expected {expected}")]
    IntegrationMismatch {
        name: String,
        expected: Uuid,
        found: Uuid,
    },

    #[error("unknown filter: {0}")]
    UnknownFilter(String),

    #[error("invalid frequency range: {0}")]
    InvalidRange(String),

    #[error("invalid filter parameter: {0}")]
    InvalidParameter(String),

    #[error("FFT error: {0}")]
    Fft(#[from] realfft::FftError),

    #[error("invalid filter settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    #[error("integration has no frames")]
    EmptyIntegration,

    #[error("channel index {0} out of range")]
    ChannelOutOfRange(usize),
}

/// Result type alias
pub type FilterResult<T> = Result<T, FilterError>;
