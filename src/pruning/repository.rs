use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::crl::SerialNumber;
use crate::pruning::errors::RecordStoreError;
use crate::pruning::records::{CertificateRecord, IdGenerator, RequestRecord};

/// Certificate records the pruning job may delete.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CertificateRepository: Send + Sync {
    fn id_generator(&self) -> IdGenerator;

    /// Certificates whose `not_after` is strictly before `cutoff`, oldest
    /// first, at most `limit` of them.
    async fn certificates_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<CertificateRecord>, RecordStoreError>;

    async fn delete_certificate(&self, serial: &SerialNumber) -> Result<(), RecordStoreError>;
}

/// Request records the pruning job may delete.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestRepository: Send + Sync {
    fn id_generator(&self) -> IdGenerator;

    /// Requests that are not complete and were last modified strictly before
    /// `cutoff`, oldest first, at most `limit` of them.
    async fn requests_modified_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<RequestRecord>, RecordStoreError>;

    async fn delete_request(&self, id: &str) -> Result<(), RecordStoreError>;
}
