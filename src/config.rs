//! Configuration of the filter chain.
//!
//! Settings are usually loaded from the reduction's configuration as JSON, e.g.
//!
//! ```json
//! {
//!     "ordering": ["kill", "whitening"],
//!     "kill": { "bands": ["0.35:0.45", "1.2--1.3"] },
//!     "whiten": { "level": 2.0, "window": 8 }
//! }
//! ```

use crate::error::FilterResult;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// Registry tags of the filters a compound filter runs, in order.
    pub ordering: Option<Vec<String>>,
    pub kill: KillSettings,
    pub whiten: WhiteningSettings,
    /// Transfer profile of a profiled filter, sampled uniformly from 0 to Nyquist.
    pub profile: Option<Vec<f32>>,
}

impl FilterSettings {
    pub fn from_json(json: &str) -> FilterResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KillSettings {
    /// Frequency bands to reject in Hz, written as `"from:to"` or `"from--to"`.
    pub bands: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhiteningSettings {
    /// Spectral windows brighter than `level` times the median RMS are flattened.
    pub level: f64,
    /// Number of frequency bins averaged per spectral window.
    pub window: usize,
}

impl Default for WhiteningSettings {
    fn default() -> Self {
        WhiteningSettings {
            level: 2.0,
            window: 8,
        }
    }
}
