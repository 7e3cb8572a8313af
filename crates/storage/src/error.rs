use std::path::PathBuf;

use common::{ErrorCode, ServiceError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("label {0} already exists")]
    DuplicateLabel(String),

    #[error("record {0} no longer exists")]
    RecordGone(u64),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt storage file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("background write failed: {0}")]
    Background(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::new(ErrorCode::StorageUndefinedError, err.to_string())
    }
}
