use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, info};

use crate::crl::cache::{CertCache, RevocationCache};
use crate::crl::errors::{RepositoryError, RepositoryResult};
use crate::crl::record::{CrlIssuingPointRecord, FirstUnsaved};
use crate::crl::repository::{
    CrlRepository, CrlUpdate, DatabaseAdmin, DeltaCrlUpdate, Modification, apply_crl_update,
    apply_delta_update, apply_modifications,
};

/// An in-memory issuing-point repository.
///
/// Useful for testing and single-process deployments.
#[derive(Debug, Default, Clone)]
pub struct MemoryCrlRepository {
    records: Arc<DashMap<String, CrlIssuingPointRecord>>,
}

impl MemoryCrlRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `change` on a copy of the record and swaps the copy in on success.
    ///
    /// The shard write lock is held for the whole call, so readers of the same
    /// id see either the old or the new record.
    fn update_with<F>(&self, id: &str, change: F) -> RepositoryResult<()>
    where
        F: FnOnce(&mut CrlIssuingPointRecord) -> RepositoryResult<()>,
    {
        let mut slot = self
            .records
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

        let mut staged = slot.clone();
        change(&mut staged)?;
        *slot = staged;
        Ok(())
    }
}

#[async_trait]
impl CrlRepository for MemoryCrlRepository {
    async fn add_issuing_point(&self, record: CrlIssuingPointRecord) -> RepositoryResult<()> {
        record.caches.check_exclusive()?;
        match self.records.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(record.id)),
            Entry::Vacant(slot) => {
                info!(id = %record.id, "Added CRL issuing point");
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn read_issuing_point(&self, id: &str) -> RepositoryResult<CrlIssuingPointRecord> {
        self.records
            .get(id)
            .map(|record| record.value().clone())
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn delete_issuing_point(&self, id: &str) -> RepositoryResult<()> {
        self.records
            .remove(id)
            .map(|_| info!(id, "Deleted CRL issuing point"))
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn modify_issuing_point(
        &self,
        id: &str,
        modifications: Vec<Modification>,
    ) -> RepositoryResult<()> {
        let count = modifications.len();
        self.update_with(id, |record| apply_modifications(record, modifications))?;
        debug!(id, count, "Applied issuing point modifications");
        Ok(())
    }

    async fn update_crl(&self, id: &str, update: CrlUpdate) -> RepositoryResult<()> {
        let number = update.crl_number.clone();
        self.update_with(id, |record| apply_crl_update(record, update))?;
        debug!(id, crl_number = %number, "Stored full CRL");
        Ok(())
    }

    async fn update_revoked_certs(
        &self,
        id: &str,
        revoked: CertCache,
        unrevoked: CertCache,
    ) -> RepositoryResult<()> {
        self.update_with(id, |record| {
            record.caches.merge_revocations(&revoked, &unrevoked);
            Ok(())
        })
    }

    async fn update_expired_certs(&self, id: &str, expired: CertCache) -> RepositoryResult<()> {
        self.update_with(id, |record| {
            record.caches.record_expired(&expired);
            Ok(())
        })
    }

    async fn update_crl_cache(
        &self,
        id: &str,
        crl_size: u64,
        caches: RevocationCache,
    ) -> RepositoryResult<()> {
        caches.check_exclusive()?;
        self.update_with(id, |record| {
            record.crl_size = crl_size;
            record.caches = caches;
            Ok(())
        })
    }

    async fn update_delta_crl(&self, id: &str, update: DeltaCrlUpdate) -> RepositoryResult<()> {
        let number = update.delta_crl_number.clone();
        self.update_with(id, |record| apply_delta_update(record, update))?;
        debug!(id, delta_crl_number = %number, "Stored delta CRL");
        Ok(())
    }

    async fn update_first_unsaved(
        &self,
        id: &str,
        first_unsaved: FirstUnsaved,
    ) -> RepositoryResult<()> {
        self.update_with(id, |record| {
            record.first_unsaved = first_unsaved;
            Ok(())
        })
    }

    async fn issuing_point_names(&self) -> RepositoryResult<Vec<String>> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl DatabaseAdmin for MemoryCrlRepository {
    async fn init(&self) -> RepositoryResult<()> {
        Ok(())
    }

    async fn init_database(&self) -> RepositoryResult<()> {
        debug!("Memory store needs no initialization");
        Ok(())
    }

    async fn rebuild_indexes(&self) -> RepositoryResult<usize> {
        Ok(self.records.len())
    }
}
