use std::sync::Arc;

use tracing::{debug, error};

use crate::crl::cache::{CacheEntry, CacheKind, CertCache, RevocationCache, cert_cache};
use crate::crl::errors::RepositoryResult;
use crate::crl::repository::CrlRepository;

/// A certificate status change that has to reach the issuing point's caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationEvent {
    Revoked(CacheEntry),
    ReleasedFromHold(CacheEntry),
    Expired(CacheEntry),
}

impl RevocationEvent {
    pub fn entry(&self) -> &CacheEntry {
        match self {
            RevocationEvent::Revoked(entry)
            | RevocationEvent::ReleasedFromHold(entry)
            | RevocationEvent::Expired(entry) => entry,
        }
    }

    /// The cache map this event lands in.
    pub fn kind(&self) -> CacheKind {
        match self {
            RevocationEvent::Revoked(_) => CacheKind::Revoked,
            RevocationEvent::ReleasedFromHold(_) => CacheKind::Unrevoked,
            RevocationEvent::Expired(_) => CacheKind::Expired,
        }
    }

    fn into_entry(self) -> CacheEntry {
        match self {
            RevocationEvent::Revoked(entry)
            | RevocationEvent::ReleasedFromHold(entry)
            | RevocationEvent::Expired(entry) => entry,
        }
    }
}

/// Feeds revocation events into the cache-only repository updates.
#[derive(Clone)]
pub struct CacheRecorder {
    repository: Arc<dyn CrlRepository>,
}

impl CacheRecorder {
    pub fn new(repository: Arc<dyn CrlRepository>) -> Self {
        Self { repository }
    }

    pub async fn record(&self, id: &str, event: RevocationEvent) -> RepositoryResult<()> {
        debug!(id, serial = %event.entry().serial, kind = %event.kind(), "Recording revocation event");
        let result = match event {
            RevocationEvent::Revoked(entry) => {
                self.repository
                    .update_revoked_certs(id, cert_cache([entry]), CertCache::new())
                    .await
            }
            RevocationEvent::ReleasedFromHold(entry) => {
                self.repository
                    .update_revoked_certs(id, CertCache::new(), cert_cache([entry]))
                    .await
            }
            RevocationEvent::Expired(entry) => {
                self.repository
                    .update_expired_certs(id, cert_cache([entry]))
                    .await
            }
        };
        if let Err(e) = &result {
            error!(id, error = %e, "Failed to record revocation event");
        }
        result
    }

    /// Records a batch with at most two repository calls.
    ///
    /// Events are folded in order first, so the latest event per serial wins
    /// just as if they had been recorded one by one. Returns the number of
    /// distinct serials written.
    ///
    /// Revocations and hold releases are written before expirations. If the
    /// expiration write fails the first write stays applied; replaying the
    /// whole batch is safe since both merges are idempotent.
    pub async fn record_batch(
        &self,
        id: &str,
        events: impl IntoIterator<Item = RevocationEvent>,
    ) -> RepositoryResult<usize> {
        let mut batch = RevocationCache::new();
        for event in events {
            let kind = event.kind();
            batch.record(kind, &cert_cache([event.into_entry()]));
        }

        let has_revocations = !batch.revoked().is_empty() || !batch.unrevoked().is_empty();
        if has_revocations {
            self.repository
                .update_revoked_certs(id, batch.revoked().clone(), batch.unrevoked().clone())
                .await
                .inspect_err(|e| error!(id, error = %e, "Failed to record revocations"))?;
        }
        if !batch.expired().is_empty() {
            self.repository
                .update_expired_certs(id, batch.expired().clone())
                .await
                .inspect_err(|e| {
                    error!(
                        id,
                        error = %e,
                        revocations_applied = has_revocations,
                        "Failed to record expirations"
                    )
                })?;
        }

        debug!(id, count = batch.len(), "Recorded revocation batch");
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::errors::RepositoryError;
    use crate::crl::record::CrlIssuingPointRecord;
    use crate::crl::repository::MockCrlRepository;
    use crate::crl::serial::{CrlNumber, SerialNumber};
    use crate::crl::store::MemoryCrlRepository;
    use chrono::Utc;

    async fn recorder() -> (CacheRecorder, Arc<MemoryCrlRepository>) {
        let repo = Arc::new(MemoryCrlRepository::new());
        repo.add_issuing_point(CrlIssuingPointRecord::new("ip", CrlNumber::from(1), 0, None, None))
            .await
            .unwrap();
        (CacheRecorder::new(repo.clone()), repo)
    }

    fn entry(serial: u64) -> CacheEntry {
        CacheEntry::new(SerialNumber::from(serial), Utc::now())
    }

    #[tokio::test]
    async fn test_events_dispatch_to_maps() {
        let (recorder, repo) = recorder().await;
        recorder.record("ip", RevocationEvent::Revoked(entry(1))).await.unwrap();
        recorder.record("ip", RevocationEvent::Expired(entry(2))).await.unwrap();
        recorder
            .record("ip", RevocationEvent::ReleasedFromHold(entry(1)))
            .await
            .unwrap();

        let record = repo.read_issuing_point("ip").await.unwrap();
        assert!(record.revoked_certs().is_empty());
        assert!(record.unrevoked_certs().contains_key(&SerialNumber::from(1)));
        assert!(record.expired_certs().contains_key(&SerialNumber::from(2)));
    }

    #[tokio::test]
    async fn test_batch_keeps_latest_event_per_serial() {
        let (recorder, repo) = recorder().await;
        let written = recorder
            .record_batch(
                "ip",
                [
                    RevocationEvent::ReleasedFromHold(entry(5)),
                    RevocationEvent::Revoked(entry(5)),
                    RevocationEvent::Expired(entry(6)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(written, 2);

        let record = repo.read_issuing_point("ip").await.unwrap();
        assert_eq!(
            record.caches.kind_of(&SerialNumber::from(5)),
            Some(CacheKind::Revoked)
        );
        assert_eq!(
            record.caches.kind_of(&SerialNumber::from(6)),
            Some(CacheKind::Expired)
        );
    }

    #[tokio::test]
    async fn test_failed_expiration_write_keeps_revocations() {
        let mut mock = MockCrlRepository::new();
        mock.expect_update_revoked_certs()
            .withf(|id, revoked, unrevoked| {
                id == "ip" && revoked.contains_key(&SerialNumber::from(1)) && unrevoked.is_empty()
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        mock.expect_update_expired_certs()
            .times(1)
            .returning(|id, _| Err(RepositoryError::NotFound(id.to_string())));

        let recorder = CacheRecorder::new(Arc::new(mock));
        let result = recorder
            .record_batch(
                "ip",
                [
                    RevocationEvent::Revoked(entry(1)),
                    RevocationEvent::Expired(entry(2)),
                ],
            )
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_replayed_batch_is_idempotent() {
        let (recorder, repo) = recorder().await;
        let events = [
            RevocationEvent::Revoked(entry(1)),
            RevocationEvent::Expired(entry(2)),
        ];
        recorder.record_batch("ip", events.clone()).await.unwrap();
        let first = repo.read_issuing_point("ip").await.unwrap();
        recorder.record_batch("ip", events).await.unwrap();
        let second = repo.read_issuing_point("ip").await.unwrap();
        assert_eq!(first.caches, second.caches);
    }

    #[tokio::test]
    async fn test_unknown_issuing_point_fails() {
        let (recorder, _) = recorder().await;
        let result = recorder.record("missing", RevocationEvent::Revoked(entry(1))).await;
        assert!(result.is_err());
    }
}
