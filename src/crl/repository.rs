use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::crl::cache::{CacheKind, CertCache, RevocationCache};
use crate::crl::errors::{RepositoryError, RepositoryResult};
use crate::crl::record::{CrlIssuingPointRecord, FirstUnsaved};
use crate::crl::serial::CrlNumber;

/// What a full CRL publication does to the cache maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDisposition {
    /// The new CRL covers only part of the pending entries; caches stay as they are.
    Keep,
    /// The new CRL absorbed the pending entries; caches are replaced.
    Replace(RevocationCache),
}

/// Fields written by a full CRL publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlUpdate {
    pub crl: Vec<u8>,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub crl_number: CrlNumber,
    pub crl_size: u64,
    pub caches: CacheDisposition,
}

impl CrlUpdate {
    /// A publication that leaves the cache maps untouched.
    pub fn new(
        crl: Vec<u8>,
        this_update: DateTime<Utc>,
        next_update: Option<DateTime<Utc>>,
        crl_number: CrlNumber,
        crl_size: u64,
    ) -> Self {
        Self {
            crl,
            this_update,
            next_update,
            crl_number,
            crl_size,
            caches: CacheDisposition::Keep,
        }
    }

    pub fn replacing_caches(mut self, caches: RevocationCache) -> Self {
        self.caches = CacheDisposition::Replace(caches);
        self
    }

    pub fn clearing_caches(self) -> Self {
        self.replacing_caches(RevocationCache::new())
    }
}

/// Fields written by a delta CRL publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaCrlUpdate {
    pub delta_crl_number: CrlNumber,
    pub delta_crl_size: u64,
    pub next_update: Option<DateTime<Utc>>,
    pub delta_crl: Vec<u8>,
}

/// A single attribute-level change for administrative corrections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modification {
    CrlNumber(CrlNumber),
    CrlSize(u64),
    DeltaCrlNumber(CrlNumber),
    DeltaCrlSize(u64),
    ThisUpdate(Option<DateTime<Utc>>),
    NextUpdate(Option<DateTime<Utc>>),
    FirstUnsaved(FirstUnsaved),
    Crl(Option<Vec<u8>>),
    DeltaCrl(Option<Vec<u8>>),
    CaCert(Option<Vec<u8>>),
    Cache(CacheKind, CertCache),
}

/// Persistence of CRL issuing-point records.
///
/// Each call applies all of its fields or none of them; readers never observe
/// a partially written call. Calls are not transactional with one another, so
/// read-modify-write sequences on the same issuing point must be serialized by
/// the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CrlRepository: Send + Sync {
    /// Inserts a new record; fails with `Conflict` if the id is taken.
    async fn add_issuing_point(&self, record: CrlIssuingPointRecord) -> RepositoryResult<()>;

    /// Returns a detached copy of the persisted record.
    async fn read_issuing_point(&self, id: &str) -> RepositoryResult<CrlIssuingPointRecord>;

    async fn delete_issuing_point(&self, id: &str) -> RepositoryResult<()>;

    /// Applies an arbitrary attribute patch. Monotonicity is not checked here.
    async fn modify_issuing_point(
        &self,
        id: &str,
        modifications: Vec<Modification>,
    ) -> RepositoryResult<()>;

    /// Persists a full CRL publication.
    async fn update_crl(&self, id: &str, update: CrlUpdate) -> RepositoryResult<()>;

    /// Merges revocations and hold releases into the cache maps.
    async fn update_revoked_certs(
        &self,
        id: &str,
        revoked: CertCache,
        unrevoked: CertCache,
    ) -> RepositoryResult<()>;

    /// Merges newly expired certificates into the cache maps.
    async fn update_expired_certs(&self, id: &str, expired: CertCache) -> RepositoryResult<()>;

    /// Replaces the cache maps and the CRL size wholesale.
    async fn update_crl_cache(
        &self,
        id: &str,
        crl_size: u64,
        caches: RevocationCache,
    ) -> RepositoryResult<()>;

    async fn update_delta_crl(&self, id: &str, update: DeltaCrlUpdate) -> RepositoryResult<()>;

    async fn update_first_unsaved(
        &self,
        id: &str,
        first_unsaved: FirstUnsaved,
    ) -> RepositoryResult<()>;

    /// Ids of all issuing points, sorted.
    async fn issuing_point_names(&self) -> RepositoryResult<Vec<String>>;
}

/// Maintenance entry points behind the `database` commands.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Checks that the backing store is reachable.
    async fn init(&self) -> RepositoryResult<()>;

    /// Prepares an empty store for use.
    async fn init_database(&self) -> RepositoryResult<()>;

    /// Rebuilds the issuing-point index, returning the number of indexed records.
    async fn rebuild_indexes(&self) -> RepositoryResult<usize>;
}

/// Rejects a full CRL number that does not advance past the stored one.
///
/// Full and delta CRLs share one number sequence, so the number may equal
/// the last delta number (issued together) but never fall below it.
pub fn check_crl_number(
    record: &CrlIssuingPointRecord,
    attempted: &CrlNumber,
) -> RepositoryResult<()> {
    if *attempted <= record.crl_number || *attempted < record.delta_crl_number {
        return Err(RepositoryError::StaleCrlNumber {
            id: record.id.clone(),
            current: record.crl_number.clone().max(record.delta_crl_number.clone()),
            attempted: attempted.clone(),
        });
    }
    Ok(())
}

/// Applies a full CRL publication to `record`.
///
/// Replacing the caches completes a generation cycle: the delta size restarts
/// at zero and the resumption cursor is cleared.
pub fn apply_crl_update(
    record: &mut CrlIssuingPointRecord,
    update: CrlUpdate,
) -> RepositoryResult<()> {
    check_crl_number(record, &update.crl_number)?;
    if let CacheDisposition::Replace(caches) = &update.caches {
        caches.check_exclusive()?;
    }

    record.crl = Some(update.crl);
    record.this_update = Some(update.this_update);
    record.next_update = update.next_update;
    record.crl_number = update.crl_number;
    record.crl_size = update.crl_size;

    if let CacheDisposition::Replace(caches) = update.caches {
        record.caches = caches;
        record.delta_crl_size = 0;
        record.first_unsaved = FirstUnsaved::Clean;
    }
    Ok(())
}

/// Validates a delta CRL publication against the stored numbers and the
/// number of cached entries it can draw from.
pub fn check_delta_update(
    record: &CrlIssuingPointRecord,
    cached_entries: usize,
    update: &DeltaCrlUpdate,
) -> RepositoryResult<()> {
    if update.delta_crl_number < record.crl_number
        || update.delta_crl_number <= record.delta_crl_number
    {
        return Err(RepositoryError::StaleCrlNumber {
            id: record.id.clone(),
            current: record.delta_crl_number.clone().max(record.crl_number.clone()),
            attempted: update.delta_crl_number.clone(),
        });
    }

    if update.delta_crl_size > cached_entries as u64 {
        return Err(RepositoryError::InvalidUpdate {
            id: record.id.clone(),
            reason: format!(
                "delta CRL size {} exceeds the {} cached entries",
                update.delta_crl_size, cached_entries
            ),
        });
    }
    Ok(())
}

pub fn apply_delta_update(
    record: &mut CrlIssuingPointRecord,
    update: DeltaCrlUpdate,
) -> RepositoryResult<()> {
    check_delta_update(record, record.caches.len(), &update)?;
    record.delta_crl_number = update.delta_crl_number;
    record.delta_crl_size = update.delta_crl_size;
    record.next_update = update.next_update;
    record.delta_crl = Some(update.delta_crl);
    Ok(())
}

/// Applies an attribute patch in order, then checks the cache invariant.
pub fn apply_modifications(
    record: &mut CrlIssuingPointRecord,
    modifications: Vec<Modification>,
) -> RepositoryResult<()> {
    for modification in modifications {
        match modification {
            Modification::CrlNumber(n) => record.crl_number = n,
            Modification::CrlSize(n) => record.crl_size = n,
            Modification::DeltaCrlNumber(n) => record.delta_crl_number = n,
            Modification::DeltaCrlSize(n) => record.delta_crl_size = n,
            Modification::ThisUpdate(t) => record.this_update = t,
            Modification::NextUpdate(t) => record.next_update = t,
            Modification::FirstUnsaved(f) => record.first_unsaved = f,
            Modification::Crl(bytes) => record.crl = bytes,
            Modification::DeltaCrl(bytes) => record.delta_crl = bytes,
            Modification::CaCert(bytes) => record.ca_cert = bytes,
            Modification::Cache(kind, entries) => record.caches.replace(kind, entries),
        }
    }
    record.caches.check_exclusive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::cache::{CacheEntry, cert_cache};
    use crate::crl::serial::SerialNumber;

    fn record() -> CrlIssuingPointRecord {
        CrlIssuingPointRecord::new("MasterCRL", CrlNumber::from(10), 3, None, None)
    }

    #[test]
    fn test_delta_number_must_not_trail_full_crl() {
        let update = DeltaCrlUpdate {
            delta_crl_number: CrlNumber::from(9),
            delta_crl_size: 0,
            next_update: None,
            delta_crl: vec![1],
        };
        assert!(matches!(
            check_delta_update(&record(), 0, &update),
            Err(RepositoryError::StaleCrlNumber { .. })
        ));
    }

    #[test]
    fn test_full_number_shares_sequence_with_delta() {
        let mut record = record();
        record.delta_crl_number = CrlNumber::from(15);
        assert!(matches!(
            check_crl_number(&record, &CrlNumber::from(14)),
            Err(RepositoryError::StaleCrlNumber { .. })
        ));
        assert!(check_crl_number(&record, &CrlNumber::from(15)).is_ok());
        assert!(check_crl_number(&record, &CrlNumber::from(16)).is_ok());
    }

    #[test]
    fn test_delta_size_bounded_by_cache() {
        let update = DeltaCrlUpdate {
            delta_crl_number: CrlNumber::from(11),
            delta_crl_size: 2,
            next_update: None,
            delta_crl: vec![1],
        };
        assert!(matches!(
            check_delta_update(&record(), 1, &update),
            Err(RepositoryError::InvalidUpdate { .. })
        ));
        assert!(check_delta_update(&record(), 2, &update).is_ok());
    }

    #[test]
    fn test_failed_patch_reports_conflict() {
        let mut rec = record();
        let entry = CacheEntry::new(SerialNumber::from(1), Utc::now());
        rec.caches.record_revoked(&cert_cache([entry.clone()]));

        let result = apply_modifications(
            &mut rec,
            vec![Modification::Cache(CacheKind::Expired, cert_cache([entry]))],
        );
        assert!(matches!(result, Err(RepositoryError::CacheConflict(_))));
    }
}
