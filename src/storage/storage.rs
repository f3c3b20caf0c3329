use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::StorageError;
use crate::datamodel::{AggregationMethod, FetchedSeries, Point, Retention, SeriesInfo};

/// How the space for a new series is materialized on the storage medium.
///
/// `sparse` creates the file without allocating its data blocks, relying on
/// sparse-file support; `preallocate` eagerly reserves the full size to avoid
/// fragmentation and write-time allocation failures. If both are set,
/// `sparse` wins and no preallocation is attempted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOptions {
    pub sparse: bool,
    pub preallocate: bool,
}

/// Capability set every storage backend must satisfy.
///
/// This is the seam allowing storage-engine substitution without touching the
/// collection pipeline upstream: any implementation honoring this contract
/// can be installed at startup via the backend factory.
///
/// Ordering: sequential `update_many` calls from one caller are applied in
/// call order for a given series. Concurrent writers on the same series may
/// interleave batches, but never single points.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    /// Per-series metadata, including the aggregation method.
    async fn info(&self, metric: &str) -> Result<SeriesInfo, StorageError>;

    /// Change the stored aggregation method, returning the previous one.
    async fn set_aggregation_method(
        &self,
        metric: &str,
        method: AggregationMethod,
    ) -> Result<AggregationMethod, StorageError>;

    /// Create a new series. Fails with `AlreadyExists` if the series is
    /// present, leaving it untouched, and with `InvalidArchiveConfig` if the
    /// tier definitions are inconsistent.
    async fn create(
        &self,
        metric: &str,
        archives: &[Retention],
        x_files_factor: f32,
        aggregation_method: AggregationMethod,
        options: CreateOptions,
    ) -> Result<(), StorageError>;

    /// Merge a batch of datapoints into an existing series. Points older than
    /// the series' maximum retention are dropped; the rest are applied
    /// best-effort in timestamp order.
    async fn update_many(&self, metric: &str, datapoints: &[Point]) -> Result<(), StorageError>;

    /// Whether the series exists. Never fails; unresolvable names are absent.
    async fn exists(&self, metric: &str) -> bool;

    /// Fetch the window `(from, until]` at the finest resolution still
    /// covering it. Returns `Ok(None)` when the window lies entirely outside
    /// the series' retention.
    async fn fetch(
        &self,
        metric: &str,
        from: u32,
        until: u32,
    ) -> Result<Option<FetchedSeries>, StorageError>;
}
