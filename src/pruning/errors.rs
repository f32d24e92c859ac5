use thiserror::Error;

use crate::pruning::records::IdGenerator;

/// Errors raised by certificate and request record stores
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordStoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record store error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for RecordStoreError {
    fn from(e: redis::RedisError) -> Self {
        RecordStoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for RecordStoreError {
    fn from(e: serde_json::Error) -> Self {
        RecordStoreError::Backend(format!("corrupt record: {e}"))
    }
}

/// Errors that abort a pruning run
#[derive(Error, Debug)]
pub enum PruningError {
    #[error("Invalid pruning configuration: {0}")]
    Config(String),

    #[error("Pruning refused: {repository} repository uses the {generator} id generator")]
    UnsupportedIdGenerator {
        repository: &'static str,
        generator: IdGenerator,
    },

    #[error("Pruning job is already running")]
    AlreadyRunning,

    #[error("Repository query failed: {0}")]
    Repository(#[from] RecordStoreError),
}

/// Convenient Result type alias
pub type PruningResult<T> = Result<T, PruningError>;
