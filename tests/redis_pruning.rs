//! Pruning against Redis-backed certificate and request records. They need
//! a running server:
//!
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_pruning -- --ignored
//! ```

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use crl_service::{
    config::RedisConfig,
    crl::SerialNumber,
    pruning::{
        CertificateRecord, CertificateRepository, CertificateStatus, IdGenerator, PruningConfig,
        PruningJob, RecordStoreError, RedisCertificateRepository, RedisRequestRepository,
        RequestRecord, RequestRepository, RequestStatus,
    },
};
use secrecy::SecretString;

async fn create_test_repositories() -> (RedisCertificateRepository, RedisRequestRepository) {
    let uri = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
    let config = RedisConfig {
        uri: SecretString::from(uri),
        prefix: format!("crl-test-{}", uuid::Uuid::new_v4()),
        lock_timeout_ms: 2000,
        lock_lease_ms: 10_000,
    };
    let conn = config.start().await.expect("failed to connect to Redis");
    (
        RedisCertificateRepository::new(conn.clone(), IdGenerator::Random)
            .with_prefix(config.prefix.clone()),
        RedisRequestRepository::new(conn, IdGenerator::Random).with_prefix(config.prefix),
    )
}

fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
}

fn certificate(serial: u64, not_after: u32, request_id: Option<&str>) -> CertificateRecord {
    CertificateRecord {
        serial: SerialNumber::from(serial),
        status: CertificateStatus::Expired,
        not_after: at(not_after),
        modified_at: at(1),
        request_id: request_id.map(str::to_string),
    }
}

fn request(id: &str, status: RequestStatus, modified_at: u32) -> RequestRecord {
    RequestRecord {
        id: id.to_string(),
        status,
        modified_at: at(modified_at),
    }
}

#[tokio::test]
#[ignore]
async fn test_expired_certificates_come_back_oldest_first() {
    let (certs, _) = create_test_repositories().await;
    for (serial, day) in [(1, 3), (2, 1), (3, 5), (4, 2)] {
        certs.insert(&certificate(serial, day, None)).await.unwrap();
    }

    let expired = certs.certificates_expired_before(at(5), None).await.unwrap();
    let serials: Vec<_> = expired.iter().map(|c| c.serial.to_string()).collect();
    assert_eq!(serials, vec!["2", "4", "1"]);

    let limited = certs.certificates_expired_before(at(5), Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);

    certs.delete_certificate(&SerialNumber::from(2)).await.unwrap();
    assert!(matches!(
        certs.delete_certificate(&SerialNumber::from(2)).await,
        Err(RecordStoreError::NotFound(_))
    ));
}

#[tokio::test]
#[ignore]
async fn test_completed_requests_leave_the_index() {
    let (_, requests) = create_test_repositories().await;
    requests
        .insert(&request("1", RequestStatus::Pending, 1))
        .await
        .unwrap();
    requests
        .insert(&request("1", RequestStatus::Complete, 2))
        .await
        .unwrap();
    requests
        .insert(&request("2", RequestStatus::Rejected, 1))
        .await
        .unwrap();

    let stale = requests.requests_modified_before(at(3), None).await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].id, "2");
}

#[tokio::test]
#[ignore]
async fn test_pruning_run_deletes_redis_records() {
    let (certs, requests) = create_test_repositories().await;
    certs.insert(&certificate(1, 1, Some("10"))).await.unwrap();
    certs.insert(&certificate(2, 28, None)).await.unwrap();
    requests
        .insert(&request("10", RequestStatus::Complete, 1))
        .await
        .unwrap();
    requests
        .insert(&request("11", RequestStatus::Pending, 1))
        .await
        .unwrap();

    let config = PruningConfig {
        cert_retention_time: 7,
        request_retention_time: 7,
        ..PruningConfig::default()
    };
    let job = PruningJob::new(config, Arc::new(certs.clone()), Arc::new(requests.clone()));
    let report = job.run_at(at(20)).await.unwrap();

    assert_eq!(report.certificates_deleted, 1);
    assert_eq!(report.requests_deleted, 2);
    assert_eq!(report.failures, 0);
    let left = certs.certificates_expired_before(at(31), None).await.unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].serial, SerialNumber::from(2));
}
