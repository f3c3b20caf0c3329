use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::storage::error::StorageError;

/// How finest-tier points are consolidated into coarser retention tiers.
///
/// Stored as per-series metadata and mutable after creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    #[default]
    Average,
    Sum,
    Last,
    Max,
    Min,
}

impl AggregationMethod {
    /// Wire code used in the series file header.
    pub fn code(&self) -> u32 {
        match self {
            AggregationMethod::Average => 1,
            AggregationMethod::Sum => 2,
            AggregationMethod::Last => 3,
            AggregationMethod::Max => 4,
            AggregationMethod::Min => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(AggregationMethod::Average),
            2 => Some(AggregationMethod::Sum),
            3 => Some(AggregationMethod::Last),
            4 => Some(AggregationMethod::Max),
            5 => Some(AggregationMethod::Min),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::Average => "average",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Last => "last",
            AggregationMethod::Max => "max",
            AggregationMethod::Min => "min",
        }
    }

    /// Consolidate the known values of one coarser-tier window.
    ///
    /// Missing slots must already be filtered out by the caller; a window
    /// with zero known values yields `None`, never zero.
    pub fn aggregate(&self, known_values: &[f64]) -> Option<f64> {
        if known_values.is_empty() {
            return None;
        }
        Some(match self {
            AggregationMethod::Average => {
                known_values.iter().sum::<f64>() / known_values.len() as f64
            }
            AggregationMethod::Sum => known_values.iter().sum(),
            AggregationMethod::Last => known_values[known_values.len() - 1],
            AggregationMethod::Max => known_values.iter().copied().fold(f64::MIN, f64::max),
            AggregationMethod::Min => known_values.iter().copied().fold(f64::MAX, f64::min),
        })
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "average" | "avg" => Ok(AggregationMethod::Average),
            "sum" => Ok(AggregationMethod::Sum),
            "last" => Ok(AggregationMethod::Last),
            "max" => Ok(AggregationMethod::Max),
            "min" => Ok(AggregationMethod::Min),
            _ => Err(StorageError::InvalidAggregation(s.to_string())),
        }
    }
}
