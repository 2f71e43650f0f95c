pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod processor;
pub mod sanitize;
pub mod storage;
pub mod upload;

pub use api::{router, ApiError, AppState};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{
    ConfigError, DocshiftError, ProcessError, Result, StorageError, UploadError,
};
pub use storage::FileStorage;
