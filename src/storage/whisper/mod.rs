//! Default storage backend: fixed-size round-robin archive files on local
//! disk, one file per series, laid out under a root data directory.
//!
//! This module is the async adapter; the blocking engine lives in
//! [`engine`] and the on-disk codec in [`format`]. Every engine call runs on
//! the blocking thread pool while holding that series' lock, so concurrent
//! writers on one series serialize and readers never observe a torn point.
//! Unrelated series do not contend.

pub mod engine;
pub mod format;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{Level, event, warn};

use super::error::StorageError;
use super::path::PathResolver;
use super::storage::{CreateOptions, StorageBackend};
use crate::datamodel::{AggregationMethod, FetchedSeries, Point, Retention, SeriesInfo};

#[derive(Debug)]
pub struct WhisperStorage {
    resolver: PathResolver,
    /// One lock per series ever touched, kept for the process lifetime.
    /// Costs a few dozen bytes per series, which is noise next to the open
    /// file it guards; revisit with an eviction pass if series cardinality
    /// outgrows memory before it outgrows disk.
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl WhisperStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            resolver: PathResolver::new(root),
            locks: DashMap::new(),
        }
    }

    /// Open the backend described by a `whisper:<data-dir>` connection
    /// string, creating the data directory if needed.
    pub async fn connect(connection_string: &str) -> Result<Self, StorageError> {
        let rest = connection_string.strip_prefix("whisper:").ok_or_else(|| {
            StorageError::BackendInit(format!(
                "not a whisper connection string: {connection_string}"
            ))
        })?;
        let root = rest.strip_prefix("//").unwrap_or(rest);
        if root.is_empty() {
            return Err(StorageError::BackendInit(
                "whisper connection string is missing a data directory".to_string(),
            ));
        }
        let storage = Self::new(root);
        tokio::fs::create_dir_all(storage.resolver.root())
            .await
            .map_err(|e| {
                StorageError::BackendInit(format!(
                    "cannot create data directory {}: {e}",
                    storage.resolver.root().display()
                ))
            })?;
        Ok(storage)
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    fn now() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    /// Resolve the metric, then run a blocking engine operation under the
    /// series lock on the blocking thread pool.
    async fn with_series<T, F>(&self, metric: &str, operation: F) -> Result<T, StorageError>
    where
        F: FnOnce(PathBuf) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.resolver.resolve(metric)?;
        let lock = self.lock_for(&path);
        let joined = tokio::task::spawn_blocking(move || {
            let _guard = lock.lock();
            operation(path)
        })
        .await;
        match joined {
            Ok(result) => result,
            Err(e) => Err(StorageError::Io(std::io::Error::other(e))),
        }
    }
}

/// Create the series' parent directories with mode 0755.
fn create_parent_dirs(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)
}

#[async_trait]
impl StorageBackend for WhisperStorage {
    async fn info(&self, metric: &str) -> Result<SeriesInfo, StorageError> {
        self.with_series(metric, move |path| engine::info(&path)).await
    }

    async fn set_aggregation_method(
        &self,
        metric: &str,
        method: AggregationMethod,
    ) -> Result<AggregationMethod, StorageError> {
        self.with_series(metric, move |path| {
            engine::set_aggregation_method(&path, method)
        })
        .await
    }

    async fn create(
        &self,
        metric: &str,
        archives: &[Retention],
        x_files_factor: f32,
        aggregation_method: AggregationMethod,
        options: CreateOptions,
    ) -> Result<(), StorageError> {
        let archives = archives.to_vec();
        self.with_series(metric, move |path| {
            if let Some(dir) = path.parent() {
                // best-effort: a truly unusable directory surfaces as the
                // file-creation error right below
                if let Err(e) = create_parent_dirs(dir) {
                    warn!(directory = %dir.display(), error = %e, "could not create series directory");
                }
            }
            event!(
                Level::INFO,
                series = %path.display(),
                tiers = archives.len(),
                xff = x_files_factor,
                aggregation = %aggregation_method,
                "creating series database file"
            );
            engine::create(&path, &archives, x_files_factor, aggregation_method, options)
        })
        .await
    }

    async fn update_many(&self, metric: &str, datapoints: &[Point]) -> Result<(), StorageError> {
        let points = datapoints.to_vec();
        let now = Self::now();
        self.with_series(metric, move |path| engine::update_many(&path, &points, now))
            .await
    }

    async fn exists(&self, metric: &str) -> bool {
        match self.resolver.resolve(metric) {
            Ok(path) => tokio::fs::metadata(path)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn fetch(
        &self,
        metric: &str,
        from: u32,
        until: u32,
    ) -> Result<Option<FetchedSeries>, StorageError> {
        let now = Self::now();
        self.with_series(metric, move |path| engine::fetch(&path, from, until, now))
            .await
    }
}
