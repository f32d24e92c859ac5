use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::crl::SerialNumber;
use crate::pruning::errors::RecordStoreError;
use crate::pruning::records::{CertificateRecord, IdGenerator, RequestRecord};
use crate::pruning::repository::{CertificateRepository, RequestRepository};

/// An in-memory certificate record store.
#[derive(Debug, Default, Clone)]
pub struct MemoryCertificateRepository {
    records: Arc<DashMap<SerialNumber, CertificateRecord>>,
    id_generator: IdGenerator,
}

impl MemoryCertificateRepository {
    pub fn new(id_generator: IdGenerator) -> Self {
        Self {
            records: Arc::default(),
            id_generator,
        }
    }

    pub fn insert(&self, record: CertificateRecord) {
        self.records.insert(record.serial.clone(), record);
    }

    pub fn get(&self, serial: &SerialNumber) -> Option<CertificateRecord> {
        self.records.get(serial).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CertificateRepository for MemoryCertificateRepository {
    fn id_generator(&self) -> IdGenerator {
        self.id_generator
    }

    async fn certificates_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<CertificateRecord>, RecordStoreError> {
        let mut expired: Vec<CertificateRecord> = self
            .records
            .iter()
            .filter(|r| r.not_after < cutoff)
            .map(|r| r.value().clone())
            .collect();
        expired.sort_by(|a, b| a.not_after.cmp(&b.not_after));
        expired.truncate(limit.unwrap_or(usize::MAX));
        Ok(expired)
    }

    async fn delete_certificate(&self, serial: &SerialNumber) -> Result<(), RecordStoreError> {
        self.records
            .remove(serial)
            .map(|_| ())
            .ok_or_else(|| RecordStoreError::NotFound(serial.to_string()))
    }
}

/// An in-memory request record store.
#[derive(Debug, Default, Clone)]
pub struct MemoryRequestRepository {
    records: Arc<DashMap<String, RequestRecord>>,
    id_generator: IdGenerator,
}

impl MemoryRequestRepository {
    pub fn new(id_generator: IdGenerator) -> Self {
        Self {
            records: Arc::default(),
            id_generator,
        }
    }

    pub fn insert(&self, record: RequestRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RequestRepository for MemoryRequestRepository {
    fn id_generator(&self) -> IdGenerator {
        self.id_generator
    }

    async fn requests_modified_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<RequestRecord>, RecordStoreError> {
        let mut stale: Vec<RequestRecord> = self
            .records
            .iter()
            .filter(|r| !r.status.is_complete() && r.modified_at < cutoff)
            .map(|r| r.value().clone())
            .collect();
        stale.sort_by(|a, b| a.modified_at.cmp(&b.modified_at));
        stale.truncate(limit.unwrap_or(usize::MAX));
        Ok(stale)
    }

    async fn delete_request(&self, id: &str) -> Result<(), RecordStoreError> {
        self.records
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RecordStoreError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pruning::records::{CertificateStatus, RequestStatus};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_expired_query_is_strict_and_limited() {
        let repo = MemoryCertificateRepository::new(IdGenerator::Random);
        for (serial, day) in [(1, 3), (2, 1), (3, 5), (4, 2)] {
            repo.insert(CertificateRecord {
                serial: SerialNumber::from(serial),
                status: CertificateStatus::Valid,
                not_after: at(day),
                modified_at: at(1),
                request_id: None,
            });
        }

        let expired = repo.certificates_expired_before(at(5), None).await.unwrap();
        let serials: Vec<_> = expired.iter().map(|c| c.serial.to_string()).collect();
        assert_eq!(serials, vec!["2", "4", "1"]);

        let limited = repo.certificates_expired_before(at(5), Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_requests_are_never_returned() {
        let repo = MemoryRequestRepository::new(IdGenerator::Random);
        repo.insert(RequestRecord {
            id: "1".into(),
            status: RequestStatus::Complete,
            modified_at: at(1),
        });
        repo.insert(RequestRecord {
            id: "2".into(),
            status: RequestStatus::Rejected,
            modified_at: at(1),
        });

        let stale = repo.requests_modified_before(at(2), None).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, "2");
        assert!(matches!(
            repo.delete_request("missing").await,
            Err(RecordStoreError::NotFound(_))
        ));
    }
}
