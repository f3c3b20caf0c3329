//! Backend selection: map a connection string to a concrete storage backend,
//! and hold the process-wide active backend chosen at startup.
//!
//! Alternate backends register a factory under a connection scheme before
//! startup; selection then never involves runtime code loading. A registered
//! factory returns a full `StorageBackend` trait object, so conformance to
//! the capability set is settled at compile time and the only fatal startup
//! condition left is an unknown scheme or a failing factory.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use super::error::StorageError;
use super::storage::StorageBackend;
use super::whisper::WhisperStorage;
use crate::config;

/// Factory for an alternate backend: receives the opaque remainder of the
/// connection string as its initialization argument.
pub type BackendFactory = Box<
    dyn Fn(&str) -> BoxFuture<'static, Result<Arc<dyn StorageBackend>, StorageError>>
        + Send
        + Sync,
>;

static REGISTRY: Lazy<RwLock<HashMap<String, BackendFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register an alternate backend under a connection scheme, e.g. a factory
/// registered as `"memory"` serves `memory:<argument>` connection strings.
/// Registering a scheme twice replaces the earlier factory.
pub fn register_backend(scheme: impl Into<String>, factory: BackendFactory) {
    REGISTRY.write().insert(scheme.into(), factory);
}

pub async fn create_storage_from_connection_string(
    connection_string: &str,
) -> Result<Arc<dyn StorageBackend>, StorageError> {
    if connection_string.starts_with("whisper:") {
        return Ok(Arc::new(WhisperStorage::connect(connection_string).await?));
    }

    let Some((scheme, argument)) = connection_string.split_once(':') else {
        return Err(StorageError::BackendInit(format!(
            "invalid connection string {connection_string:?}, expected scheme:argument"
        )));
    };
    let future = {
        let registry = REGISTRY.read();
        match registry.get(scheme) {
            Some(factory) => factory(argument),
            None => {
                let mut known: Vec<&str> = registry.keys().map(String::as_str).collect();
                known.push("whisper");
                known.sort_unstable();
                return Err(StorageError::BackendInit(format!(
                    "unknown storage backend {scheme:?}; registered backends: {}",
                    known.join(", ")
                )));
            }
        }
    };
    future.await
}

static ACTIVE_BACKEND: OnceLock<Arc<dyn StorageBackend>> = OnceLock::new();

/// Build the process-wide backend from configuration. Called once at process
/// startup; an error here is fatal for the caller since there is no degraded
/// mode without storage. Later calls return the already-installed instance.
pub async fn init_active_backend() -> Result<Arc<dyn StorageBackend>, StorageError> {
    if let Some(backend) = ACTIVE_BACKEND.get() {
        return Ok(backend.clone());
    }
    let config = config::get().map_err(|e| StorageError::BackendInit(e.to_string()))?;
    let backend = create_storage_from_connection_string(&config.connection_string()).await?;
    Ok(ACTIVE_BACKEND.get_or_init(|| backend).clone())
}

/// The backend installed by `init_active_backend`.
pub fn active_backend() -> Result<Arc<dyn StorageBackend>, StorageError> {
    ACTIVE_BACKEND.get().cloned().ok_or_else(|| {
        StorageError::BackendInit(
            "storage backend not initialized; call init_active_backend() at startup".to_string(),
        )
    })
}
