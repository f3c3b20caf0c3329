use serde::{Deserialize, Serialize};

use super::{AggregationMethod, Retention};

/// Per-series metadata as reported by `StorageBackend::info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesInfo {
    pub aggregation_method: AggregationMethod,
    /// Longest window covered by any tier, in seconds.
    pub max_retention: u32,
    /// Minimum fraction of known points a consolidation window needs before
    /// its aggregate is written to the coarser tier.
    pub x_files_factor: f32,
    /// Retention tiers, finest resolution first.
    pub archives: Vec<Retention>,
}

/// One fetched window of step-aligned slots.
///
/// `values[i]` covers the interval starting at `from + i * step`; slots with
/// no known datapoint are `None`. `from` is the first step boundary after the
/// requested start, `until` is exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedSeries {
    pub from: u32,
    pub until: u32,
    pub step: u32,
    pub values: Vec<Option<f64>>,
}

impl FetchedSeries {
    /// Iterate the window as `(interval timestamp, value)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (u32, Option<f64>)> + '_ {
        let (from, step) = (self.from, self.step);
        self.values
            .iter()
            .enumerate()
            .map(move |(i, value)| (from + i as u32 * step, *value))
    }
}
