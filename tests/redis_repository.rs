//! Redis-backed repository tests. They need a running server:
//!
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_repository -- --ignored
//! ```

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use crl_service::{
    config::RedisConfig,
    crl::{
        CacheEntry, CacheKind, CrlIssuingPointRecord, CrlNumber, CrlRepository, CrlUpdate,
        DatabaseAdmin, DeltaCrlUpdate, FirstUnsaved, Modification, RedisCrlRepository,
        RepositoryError, RevocationCache, RevocationReason, SerialNumber, cert_cache,
    },
};
use secrecy::SecretString;

// Helper function to connect with a prefix no other test uses
async fn create_test_repository() -> RedisCrlRepository {
    let uri = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let config = RedisConfig {
        uri: SecretString::from(uri),
        prefix: format!("crl-test-{}", uuid::Uuid::new_v4()),
        lock_timeout_ms: 2000,
        lock_lease_ms: 10_000,
    };
    let conn = config.start().await.expect("failed to connect to Redis");
    let repo = RedisCrlRepository::new(conn)
        .with_prefix(config.prefix.clone())
        .with_lock_timeout(config.lock_timeout())
        .with_lock_lease(config.lock_lease());
    repo.init().await.unwrap();
    repo.init_database().await.unwrap();
    repo
}

fn entry(serial: u64) -> CacheEntry {
    CacheEntry::new(
        SerialNumber::from(serial),
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
    )
    .with_reason(RevocationReason::KeyCompromise)
}

fn record(id: &str) -> CrlIssuingPointRecord {
    let this_update = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    CrlIssuingPointRecord::new(id, CrlNumber::from(10), 0, Some(this_update), None)
        .with_ca_cert(vec![0x30, 0x00])
}

#[tokio::test]
#[ignore]
async fn test_record_round_trips_through_redis() {
    let repo = create_test_repository().await;
    let original = record("MasterCRL");
    repo.add_issuing_point(original.clone()).await.unwrap();

    let stored = repo.read_issuing_point("MasterCRL").await.unwrap();
    assert_eq!(stored, original);
    assert_eq!(stored.first_unsaved, FirstUnsaved::New);
    assert!(matches!(
        repo.add_issuing_point(record("MasterCRL")).await,
        Err(RepositoryError::Conflict(_))
    ));
}

#[tokio::test]
#[ignore]
async fn test_cache_merges_are_exclusive() {
    let repo = create_test_repository().await;
    repo.add_issuing_point(record("MasterCRL")).await.unwrap();

    repo.update_revoked_certs("MasterCRL", cert_cache([entry(1), entry(2)]), cert_cache([]))
        .await
        .unwrap();
    repo.update_revoked_certs("MasterCRL", cert_cache([]), cert_cache([entry(1)]))
        .await
        .unwrap();
    repo.update_expired_certs("MasterCRL", cert_cache([entry(2)]))
        .await
        .unwrap();

    let caches = repo.read_issuing_point("MasterCRL").await.unwrap().caches;
    assert!(caches.revoked().is_empty());
    assert_eq!(caches.kind_of(&SerialNumber::from(1)), Some(CacheKind::Unrevoked));
    assert_eq!(caches.kind_of(&SerialNumber::from(2)), Some(CacheKind::Expired));
    assert_eq!(
        caches.unrevoked()[&SerialNumber::from(1)].reason,
        Some(RevocationReason::KeyCompromise)
    );
}

#[tokio::test]
#[ignore]
async fn test_full_and_delta_publication() {
    let repo = create_test_repository().await;
    repo.add_issuing_point(record("MasterCRL")).await.unwrap();
    repo.update_revoked_certs("MasterCRL", cert_cache([entry(7)]), cert_cache([]))
        .await
        .unwrap();

    let delta = DeltaCrlUpdate {
        delta_crl_number: CrlNumber::from(11),
        delta_crl_size: 1,
        next_update: None,
        delta_crl: vec![0x30, 0x01],
    };
    repo.update_delta_crl("MasterCRL", delta.clone()).await.unwrap();
    assert!(matches!(
        repo.update_delta_crl("MasterCRL", delta).await,
        Err(RepositoryError::StaleCrlNumber { .. })
    ));

    let update = CrlUpdate::new(
        vec![0x30, 0x02],
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        None,
        CrlNumber::from(12),
        1,
    )
    .clearing_caches();
    repo.update_crl("MasterCRL", update).await.unwrap();

    let stored = repo.read_issuing_point("MasterCRL").await.unwrap();
    assert_eq!(stored.crl_number, CrlNumber::from(12));
    assert_eq!(stored.delta_crl_size, 0);
    assert_eq!(stored.first_unsaved, FirstUnsaved::Clean);
    assert!(stored.caches.is_empty());
    assert_eq!(stored.crl, Some(vec![0x30, 0x02]));
}

#[tokio::test]
#[ignore]
async fn test_modify_and_wholesale_cache_replace() {
    let repo = create_test_repository().await;
    repo.add_issuing_point(record("MasterCRL")).await.unwrap();

    repo.modify_issuing_point(
        "MasterCRL",
        vec![
            Modification::CrlNumber(CrlNumber::from(3)),
            Modification::FirstUnsaved(FirstUnsaved::Cursor(SerialNumber::from(5))),
        ],
    )
    .await
    .unwrap();

    let mut caches = RevocationCache::new();
    caches.record_revoked(&cert_cache([entry(5), entry(6)]));
    repo.update_crl_cache("MasterCRL", 2, caches.clone())
        .await
        .unwrap();

    let stored = repo.read_issuing_point("MasterCRL").await.unwrap();
    assert_eq!(stored.crl_number, CrlNumber::from(3));
    assert_eq!(stored.crl_size, 2);
    assert_eq!(stored.caches, caches);
    assert_eq!(
        stored.first_unsaved,
        FirstUnsaved::Cursor(SerialNumber::from(5))
    );
}

#[tokio::test]
#[ignore]
async fn test_index_rebuild_and_delete() {
    let repo = create_test_repository().await;
    repo.add_issuing_point(record("ip1")).await.unwrap();
    repo.add_issuing_point(record("ip2")).await.unwrap();
    repo.update_revoked_certs("ip1", cert_cache([entry(1)]), cert_cache([]))
        .await
        .unwrap();

    assert_eq!(repo.rebuild_indexes().await.unwrap(), 2);
    repo.delete_issuing_point("ip1").await.unwrap();
    assert_eq!(repo.issuing_point_names().await.unwrap(), vec!["ip2".to_string()]);
    assert!(matches!(
        repo.read_issuing_point("ip1").await,
        Err(RepositoryError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore]
async fn test_concurrent_merges_are_not_lost() {
    let repo = Arc::new(create_test_repository().await);
    repo.add_issuing_point(record("MasterCRL")).await.unwrap();

    let handles: Vec<_> = (0..8u64)
        .map(|serial| {
            let repo = Arc::clone(&repo);
            tokio::spawn(async move {
                repo.update_revoked_certs("MasterCRL", cert_cache([entry(serial)]), cert_cache([]))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = repo.read_issuing_point("MasterCRL").await.unwrap();
    assert_eq!(stored.caches.revoked().len(), 8);
}

#[tokio::test]
#[ignore]
async fn test_ids_with_colons_stay_separate() {
    let repo = create_test_repository().await;
    repo.add_issuing_point(record("a")).await.unwrap();
    repo.update_revoked_certs("a", cert_cache([entry(1)]), cert_cache([]))
        .await
        .unwrap();

    repo.add_issuing_point(record("a:revoked")).await.unwrap();
    let owner = repo.read_issuing_point("a").await.unwrap();
    assert_eq!(owner.caches.revoked().len(), 1);

    let update = CrlUpdate::new(
        vec![0x30, 0x03],
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        None,
        CrlNumber::from(11),
        1,
    )
    .clearing_caches();
    repo.update_crl("a", update).await.unwrap();

    let other = repo.read_issuing_point("a:revoked").await.unwrap();
    assert_eq!(other.crl_number, CrlNumber::from(10));
    assert_eq!(
        repo.issuing_point_names().await.unwrap(),
        vec!["a".to_string(), "a:revoked".to_string()]
    );
}
