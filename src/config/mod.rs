use std::sync::{Arc, Mutex, OnceLock};

use anyhow::Error;
use confique::Config;

use crate::storage::storage::CreateOptions;

#[derive(Debug, Config)]
pub struct WhorlConfig {
    /// Root directory for the default whisper engine's series files.
    #[config(env = "WHORL_DATA_DIR", default = "./data")]
    pub data_dir: String,

    /// Connection string selecting the active storage backend, e.g.
    /// `whisper:/var/lib/whorl`. When unset, the default whisper engine is
    /// installed on `data_dir`.
    #[config(env = "WHORL_STORAGE_BACKEND")]
    pub storage_backend: Option<String>,

    /// Create series files sparse instead of materializing their space.
    #[config(env = "WHORL_WHISPER_SPARSE_CREATE", default = false)]
    pub whisper_sparse_create: bool,

    /// Eagerly reserve series file space at creation to avoid fragmentation
    /// and write-time allocation failures. Ignored when sparse is set.
    #[config(env = "WHORL_WHISPER_FALLOCATE_CREATE", default = true)]
    pub whisper_fallocate_create: bool,
}

impl WhorlConfig {
    pub fn load() -> Result<WhorlConfig, Error> {
        let c = WhorlConfig::builder().env().file("settings.toml").load()?;

        Ok(c)
    }

    /// Connection string for the backend selector.
    pub fn connection_string(&self) -> String {
        match &self.storage_backend {
            Some(backend) => backend.clone(),
            None => format!("whisper:{}", self.data_dir),
        }
    }

    /// Configured default creation flags for the whisper engine.
    pub fn create_options(&self) -> CreateOptions {
        CreateOptions {
            sparse: self.whisper_sparse_create,
            preallocate: self.whisper_fallocate_create,
        }
    }
}

static WHORL_CONFIG: OnceLock<Arc<WhorlConfig>> = OnceLock::new();

pub fn get() -> Result<Arc<WhorlConfig>, Error> {
    WHORL_CONFIG.get().cloned().ok_or_else(|| {
        Error::msg(
            "Configuration not loaded. Please call load_configuration() before using the configuration",
        )
    })
}

pub fn load_configuration() -> Result<(), Error> {
    // Check if the configuration has already been loaded
    if WHORL_CONFIG.get().is_some() {
        return Ok(());
    }

    // Load configuration
    let config = WhorlConfig::load()?;
    WHORL_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}

// Used by integration tests - must be always available for test compilation
#[allow(dead_code)] // Used by integration tests, not visible in cargo check
static TEST_CONFIG_INIT: Mutex<()> = Mutex::new(());

/// Test-only function to ensure configuration is loaded exactly once per test run
/// Available for both unit tests and integration tests
#[allow(dead_code)] // Used by integration tests, not visible in cargo check
pub fn load_configuration_for_tests() -> Result<(), Error> {
    let _guard = TEST_CONFIG_INIT.lock().unwrap();

    // If config is already loaded, return success
    if WHORL_CONFIG.get().is_some() {
        return Ok(());
    }

    // Load default configuration for tests
    let config = WhorlConfig::load()?;
    WHORL_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}
