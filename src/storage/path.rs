use std::path::{Path, PathBuf};

use super::error::StorageError;

/// File extension for series database files.
pub const SERIES_FILE_EXTENSION: &str = "wsp";

/// Maps dotted metric names to series files under a fixed root directory.
///
/// `a.b.c` resolves to `<root>/a/b/c.wsp`. Resolution is pure: the same name
/// always yields the same path and the filesystem is never consulted.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a metric name to its series file path.
    ///
    /// Splitting on `.` means no segment can itself contain a dot, so `..`
    /// components cannot arise from the name; what remains to reject is empty
    /// segments and separator characters smuggled inside a segment, either of
    /// which could escape or clutter the root.
    pub fn resolve(&self, metric: &str) -> Result<PathBuf, StorageError> {
        if metric.is_empty() {
            return Err(invalid(metric, "empty name"));
        }
        let mut path = self.root.clone();
        for segment in metric.split('.') {
            if segment.is_empty() {
                return Err(invalid(metric, "empty path segment"));
            }
            if segment.contains(['/', '\\', '\0']) {
                return Err(invalid(metric, "path separator in segment"));
            }
            path.push(segment);
        }
        path.set_extension(SERIES_FILE_EXTENSION);
        Ok(path)
    }
}

fn invalid(metric: &str, reason: &str) -> StorageError {
    StorageError::InvalidMetricName(format!("{metric:?}: {reason}"))
}
