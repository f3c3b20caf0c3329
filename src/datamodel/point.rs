use serde::{Deserialize, Serialize};

/// One datapoint: whole seconds since the Unix epoch, and a value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: u32,
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: u32, value: f64) -> Self {
        Self { timestamp, value }
    }

    /// Floor the timestamp to the given step.
    pub fn align(&self, step: u32) -> u32 {
        self.timestamp - (self.timestamp % step)
    }
}
