pub mod error;
pub mod path;
pub mod storage;
pub mod storage_factory;
pub mod whisper;

pub use error::StorageError;
pub use path::PathResolver;
pub use storage::{CreateOptions, StorageBackend};
