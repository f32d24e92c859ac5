use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, aio::ConnectionManager};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::crl::SerialNumber;
use crate::pruning::errors::RecordStoreError;
use crate::pruning::records::{CertificateRecord, IdGenerator, RequestRecord};
use crate::pruning::repository::{CertificateRepository, RequestRepository};

const DEFAULT_PREFIX: &str = "crl";

fn certificate_key(prefix: &str, serial: impl fmt::Display) -> String {
    format!("{prefix}:cert:{serial}")
}

fn certificate_index_key(prefix: &str) -> String {
    format!("{prefix}:certs:not-after")
}

fn request_key(prefix: &str, id: &str) -> String {
    format!("{prefix}:request:{id}")
}

fn request_index_key(prefix: &str) -> String {
    format!("{prefix}:requests:open")
}

/// Exclusive upper score bound for `ZRANGEBYSCORE`.
fn score_before(cutoff: DateTime<Utc>) -> String {
    format!("({}", cutoff.timestamp_micros())
}

async fn records_before<T: DeserializeOwned>(
    conn: &mut ConnectionManager,
    index: &str,
    cutoff: DateTime<Utc>,
    limit: Option<usize>,
    key_of: impl Fn(&str) -> String,
) -> Result<Vec<T>, RecordStoreError> {
    let members: Vec<String> = match limit {
        Some(limit) => {
            let count = isize::try_from(limit).unwrap_or(isize::MAX);
            conn.zrangebyscore_limit(index, "-inf", score_before(cutoff), 0, count)
                .await?
        }
        None => conn.zrangebyscore(index, "-inf", score_before(cutoff)).await?,
    };
    if members.is_empty() {
        return Ok(Vec::new());
    }

    let keys: Vec<String> = members.iter().map(|m| key_of(m)).collect();
    let values: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;

    // An index entry without a record is left over from an interrupted
    // writer; the record is already gone.
    let mut records = Vec::with_capacity(values.len());
    for value in values.into_iter().flatten() {
        records.push(serde_json::from_str(&value)?);
    }
    Ok(records)
}

/// Certificate records kept in Redis.
///
/// Each certificate is a JSON string under `{prefix}:cert:{serial}`, indexed
/// by `not_after` in the sorted set `{prefix}:certs:not-after`.
#[derive(Clone)]
pub struct RedisCertificateRepository {
    conn: ConnectionManager,
    prefix: String,
    id_generator: IdGenerator,
}

impl RedisCertificateRepository {
    pub fn new(conn: ConnectionManager, id_generator: IdGenerator) -> Self {
        Self {
            conn,
            prefix: DEFAULT_PREFIX.to_string(),
            id_generator,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Stores a certificate record, replacing any record with the same serial.
    pub async fn insert(&self, record: &CertificateRecord) -> Result<(), RecordStoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .set(
                certificate_key(&self.prefix, &record.serial),
                serde_json::to_string(record)?,
            )
            .ignore()
            .zadd(
                certificate_index_key(&self.prefix),
                record.serial.to_string(),
                record.not_after.timestamp_micros(),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CertificateRepository for RedisCertificateRepository {
    fn id_generator(&self) -> IdGenerator {
        self.id_generator
    }

    async fn certificates_expired_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<CertificateRecord>, RecordStoreError> {
        let mut conn = self.conn.clone();
        let prefix = &self.prefix;
        let records: Vec<CertificateRecord> = records_before(
            &mut conn,
            &certificate_index_key(prefix),
            cutoff,
            limit,
            |serial| certificate_key(prefix, serial),
        )
        .await?;
        debug!(count = records.len(), %cutoff, "Loaded expired certificates");
        Ok(records)
    }

    async fn delete_certificate(&self, serial: &SerialNumber) -> Result<(), RecordStoreError> {
        let mut conn = self.conn.clone();
        let (deleted, _): (u64, u64) = redis::pipe()
            .atomic()
            .del(certificate_key(&self.prefix, serial))
            .zrem(certificate_index_key(&self.prefix), serial.to_string())
            .query_async(&mut conn)
            .await?;
        if deleted == 0 {
            return Err(RecordStoreError::NotFound(serial.to_string()));
        }
        Ok(())
    }
}

/// Request records kept in Redis.
///
/// Each request is a JSON string under `{prefix}:request:{id}`. Only requests
/// that are not complete are indexed by `modified_at`, in the sorted set
/// `{prefix}:requests:open`.
#[derive(Clone)]
pub struct RedisRequestRepository {
    conn: ConnectionManager,
    prefix: String,
    id_generator: IdGenerator,
}

impl RedisRequestRepository {
    pub fn new(conn: ConnectionManager, id_generator: IdGenerator) -> Self {
        Self {
            conn,
            prefix: DEFAULT_PREFIX.to_string(),
            id_generator,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Stores a request record, replacing any record with the same id.
    pub async fn insert(&self, record: &RequestRecord) -> Result<(), RecordStoreError> {
        let mut conn = self.conn.clone();
        let index = request_index_key(&self.prefix);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(request_key(&self.prefix, &record.id), serde_json::to_string(record)?)
            .ignore();
        if record.status.is_complete() {
            pipe.zrem(&index, &record.id).ignore();
        } else {
            pipe.zadd(&index, &record.id, record.modified_at.timestamp_micros())
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl RequestRepository for RedisRequestRepository {
    fn id_generator(&self) -> IdGenerator {
        self.id_generator
    }

    async fn requests_modified_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<RequestRecord>, RecordStoreError> {
        let mut conn = self.conn.clone();
        let prefix = &self.prefix;
        let records: Vec<RequestRecord> = records_before(
            &mut conn,
            &request_index_key(prefix),
            cutoff,
            limit,
            |id| request_key(prefix, id),
        )
        .await?;
        debug!(count = records.len(), %cutoff, "Loaded stale requests");
        Ok(records)
    }

    async fn delete_request(&self, id: &str) -> Result<(), RecordStoreError> {
        let mut conn = self.conn.clone();
        let (deleted, _): (u64, u64) = redis::pipe()
            .atomic()
            .del(request_key(&self.prefix, id))
            .zrem(request_index_key(&self.prefix), id)
            .query_async(&mut conn)
            .await?;
        if deleted == 0 {
            return Err(RecordStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_keys_stay_clear_of_issuing_point_keys() {
        let serial = SerialNumber::from(42);
        assert_eq!(certificate_key("crl", &serial), "crl:cert:42");
        assert_eq!(certificate_key("crl", "42"), "crl:cert:42");
        assert_eq!(request_key("crl", "ip:7"), "crl:request:ip:7");
        assert!(!certificate_key("crl", &serial).starts_with("crl:ip:"));
        assert!(!request_key("crl", "x").starts_with("crl:ip:"));
    }

    #[test]
    fn test_cutoff_bound_is_exclusive() {
        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(score_before(cutoff), format!("({}", cutoff.timestamp_micros()));
    }
}
