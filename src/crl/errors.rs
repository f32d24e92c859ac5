use thiserror::Error;

use crate::crl::serial::{CrlNumber, SerialNumber};

/// Errors raised by CRL issuing-point repositories
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("CRL issuing point not found: {0}")]
    NotFound(String),

    #[error("CRL issuing point already exists: {0}")]
    Conflict(String),

    #[error("CRL number {attempted} for issuing point {id} does not advance past {current}")]
    StaleCrlNumber {
        id: String,
        current: CrlNumber,
        attempted: CrlNumber,
    },

    #[error("Rejected update of issuing point {id}: {reason}")]
    InvalidUpdate { id: String, reason: String },

    #[error("Serial number {0} would be present in more than one cache map")]
    CacheConflict(SerialNumber),

    #[error("Issuing point {0} is locked by another writer")]
    Busy(String),

    #[error("Backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("Corrupt persisted state for issuing point {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Convenient Result type alias
pub type RepositoryResult<T> = Result<T, RepositoryError>;
