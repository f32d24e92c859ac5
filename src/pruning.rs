//! Retention pruning of certificate and request records.
//!
//! [`PruningJob`] deletes certificates whose validity ended before the
//! certificate retention cutoff, together with the requests that produced
//! them, then deletes stale incomplete requests. [`PruningScheduler`] drives
//! the job from a cron expression.

pub mod cron;
pub mod errors;
pub mod job;
pub mod memory;
pub mod records;
pub mod redis;
pub mod repository;
pub mod retention;
pub mod scheduler;

pub use cron::CronSchedule;
pub use errors::{PruningError, PruningResult, RecordStoreError};
pub use job::{JobState, PruneReport, PruningConfig, PruningJob};
pub use memory::{MemoryCertificateRepository, MemoryRequestRepository};
pub use self::redis::{RedisCertificateRepository, RedisRequestRepository};
pub use records::{
    CertificateRecord, CertificateStatus, IdGenerator, RequestRecord, RequestStatus,
};
pub use repository::{CertificateRepository, RequestRepository};
pub use retention::{Retention, RetentionUnit};
pub use scheduler::PruningScheduler;
