use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Pipeline, RedisResult, Script, aio::ConnectionManager};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::crl::cache::{CacheEntry, CacheKind, CertCache, RevocationCache};
use crate::crl::errors::{RepositoryError, RepositoryResult};
use crate::crl::record::{CrlIssuingPointRecord, FirstUnsaved};
use crate::crl::repository::{
    CacheDisposition, CrlRepository, CrlUpdate, DatabaseAdmin, DeltaCrlUpdate, Modification,
    apply_crl_update, apply_modifications, check_delta_update,
};

pub const DEFAULT_PREFIX: &str = "crl";
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(30);

const LOCK_RETRY: Duration = Duration::from_millis(25);
const LOCK_JITTER_MS: u64 = 25;
const SCHEMA_VERSION: &str = "1";
const SCAN_BATCH: usize = 200;

// Deletes the lock only if it still holds our token.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

const ID: &str = "id";
const CRL_NUMBER: &str = "crl_number";
const CRL_SIZE: &str = "crl_size";
const DELTA_CRL_NUMBER: &str = "delta_crl_number";
const DELTA_CRL_SIZE: &str = "delta_crl_size";
const FIRST_UNSAVED: &str = "first_unsaved";
const THIS_UPDATE: &str = "this_update";
const NEXT_UPDATE: &str = "next_update";
const CRL: &str = "crl";
const DELTA_CRL: &str = "delta_crl";
const CA_CERT: &str = "ca_cert";

/// A Redis issuing-point repository.
///
/// Each record is stored as one hash of scalar attributes plus one hash per
/// cache map, keyed by serial number. Writers serialize per issuing point
/// through a leased lock key and commit with `MULTI/EXEC`.
///
/// The lease bounds how long one write may take. A writer that stalls past
/// it loses the lock to the next writer, and the two may interleave; this is
/// reported as a warning when the late writer releases.
#[derive(Clone)]
pub struct RedisCrlRepository {
    conn: ConnectionManager,
    prefix: String,
    lock_timeout: Duration,
    lock_lease: Duration,
}

struct LockGuard {
    key: String,
    token: String,
}

impl RedisCrlRepository {
    /// Creates a new repository from a connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            prefix: DEFAULT_PREFIX.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_lease: DEFAULT_LOCK_LEASE,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// How long a writer waits for another writer of the same issuing point.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// How long a lock is held before Redis expires it.
    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    fn index_key(&self) -> String {
        format!("{}:issuing-points", self.prefix)
    }

    fn record_key(&self, id: &str) -> String {
        record_key(&self.prefix, id)
    }

    fn cache_key(&self, id: &str, kind: CacheKind) -> String {
        cache_key(&self.prefix, kind, id)
    }

    fn lock_key(&self, id: &str) -> String {
        format!("{}:lock:{id}", self.prefix)
    }

    fn schema_key(&self) -> String {
        format!("{}:schema-version", self.prefix)
    }

    async fn lock(&self, id: &str) -> RepositoryResult<LockGuard> {
        let mut conn = self.conn.clone();
        let key = self.lock_key(id);
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.lock_timeout;

        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(lease_millis(self.lock_lease))
                .query_async(&mut conn)
                .await?;
            if acquired.is_some() {
                return Ok(LockGuard { key, token });
            }
            if Instant::now() >= deadline {
                warn!(id, "Timed out waiting for issuing point lock");
                return Err(RepositoryError::Busy(id.to_string()));
            }
            let jitter = Duration::from_millis(rand::random_range(0..LOCK_JITTER_MS));
            sleep(LOCK_RETRY + jitter).await;
        }
    }

    async fn unlock(&self, guard: LockGuard) {
        let mut conn = self.conn.clone();
        let released: RedisResult<i32> = Script::new(UNLOCK_SCRIPT)
            .key(&guard.key)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await;
        match released {
            Ok(0) => warn!(
                key = %guard.key,
                lease_ms = lease_millis(self.lock_lease),
                "Issuing point lock lease expired before release, writes may have interleaved"
            ),
            Ok(_) => {}
            // The lease expires on its own.
            Err(e) => warn!(key = %guard.key, error = %e, "Failed to release issuing point lock"),
        }
    }

    /// Runs `op` while holding the write lock of `id`.
    async fn locked<T, F>(&self, id: &str, op: F) -> RepositoryResult<T>
    where
        F: Future<Output = RepositoryResult<T>> + Send,
    {
        let guard = self.lock(id).await?;
        let result = op.await;
        self.unlock(guard).await;
        result
    }

    async fn ensure_exists(&self, conn: &mut ConnectionManager, id: &str) -> RepositoryResult<()> {
        let exists: bool = conn.exists(self.record_key(id)).await?;
        if exists {
            Ok(())
        } else {
            Err(RepositoryError::NotFound(id.to_string()))
        }
    }

    async fn load(&self, id: &str) -> RepositoryResult<CrlIssuingPointRecord> {
        let mut conn = self.conn.clone();
        let (fields, revoked, unrevoked, expired): (
            HashMap<String, String>,
            HashMap<String, String>,
            HashMap<String, String>,
            HashMap<String, String>,
        ) = redis::pipe()
            .atomic()
            .hgetall(self.record_key(id))
            .hgetall(self.cache_key(id, CacheKind::Revoked))
            .hgetall(self.cache_key(id, CacheKind::Unrevoked))
            .hgetall(self.cache_key(id, CacheKind::Expired))
            .query_async(&mut conn)
            .await?;

        if fields.is_empty() {
            return Err(RepositoryError::NotFound(id.to_string()));
        }

        let record = decode_record(id, &fields)?;
        let caches = RevocationCache::from_maps(
            decode_cache(revoked)?,
            decode_cache(unrevoked)?,
            decode_cache(expired)?,
        )
        .map_err(|e| corrupt(id, e.to_string()))?;
        Ok(record.with_caches(caches))
    }

    /// Loads the scalar attributes only; the returned caches are empty.
    async fn load_scalars(
        &self,
        conn: &mut ConnectionManager,
        id: &str,
    ) -> RepositoryResult<CrlIssuingPointRecord> {
        let fields: HashMap<String, String> = conn.hgetall(self.record_key(id)).await?;
        if fields.is_empty() {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        decode_record(id, &fields)
    }

    fn queue_scalars(&self, pipe: &mut Pipeline, record: &CrlIssuingPointRecord) {
        let key = self.record_key(&record.id);
        pipe.hset_multiple(&key, &encode_record(record)).ignore();
        let absent = absent_fields(record);
        if !absent.is_empty() {
            pipe.hdel(&key, absent).ignore();
        }
    }

    fn queue_caches(
        &self,
        pipe: &mut Pipeline,
        id: &str,
        caches: &RevocationCache,
    ) -> RepositoryResult<()> {
        for kind in CacheKind::ALL {
            let key = self.cache_key(id, kind);
            pipe.del(&key).ignore();
            let entries = encode_cache(caches.get(kind))?;
            if !entries.is_empty() {
                pipe.hset_multiple(&key, &entries).ignore();
            }
        }
        Ok(())
    }

    /// Queues a per-serial merge into `kind`, evicting the serials from the
    /// other two maps.
    fn queue_merge(
        &self,
        pipe: &mut Pipeline,
        id: &str,
        kind: CacheKind,
        entries: &CertCache,
    ) -> RepositoryResult<()> {
        let key = self.cache_key(id, kind);
        for (serial, entry) in entries {
            let field = serial.to_string();
            for other in CacheKind::ALL.into_iter().filter(|other| *other != kind) {
                pipe.hdel(self.cache_key(id, other), &field).ignore();
            }
            pipe.hset(&key, &field, serde_json::to_string(entry)?).ignore();
        }
        Ok(())
    }

    async fn add_inner(&self, record: CrlIssuingPointRecord) -> RepositoryResult<()> {
        record.caches.check_exclusive()?;
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(self.record_key(&record.id)).await?;
        if exists {
            return Err(RepositoryError::Conflict(record.id));
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_scalars(&mut pipe, &record);
        self.queue_caches(&mut pipe, &record.id, &record.caches)?;
        pipe.sadd(self.index_key(), &record.id).ignore();
        let _: () = pipe.query_async(&mut conn).await?;

        info!(id = %record.id, "Added CRL issuing point");
        Ok(())
    }

    async fn delete_inner(&self, id: &str) -> RepositoryResult<()> {
        let mut conn = self.conn.clone();
        self.ensure_exists(&mut conn, id).await?;

        let mut keys = vec![self.record_key(id)];
        keys.extend(CacheKind::ALL.map(|kind| self.cache_key(id, kind)));

        let _: () = redis::pipe()
            .atomic()
            .del(keys)
            .ignore()
            .srem(self.index_key(), id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        info!(id, "Deleted CRL issuing point");
        Ok(())
    }

    async fn modify_inner(&self, id: &str, modifications: Vec<Modification>) -> RepositoryResult<()> {
        let mut record = self.load(id).await?;
        apply_modifications(&mut record, modifications)?;

        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_scalars(&mut pipe, &record);
        self.queue_caches(&mut pipe, id, &record.caches)?;
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn update_crl_inner(&self, id: &str, update: CrlUpdate) -> RepositoryResult<()> {
        let mut conn = self.conn.clone();
        let mut record = self.load_scalars(&mut conn, id).await?;
        let replaces_caches = matches!(update.caches, CacheDisposition::Replace(_));
        apply_crl_update(&mut record, update)?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_scalars(&mut pipe, &record);
        if replaces_caches {
            self.queue_caches(&mut pipe, id, &record.caches)?;
        }
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(id, crl_number = %record.crl_number, replaces_caches, "Stored full CRL");
        Ok(())
    }

    async fn merge_inner(
        &self,
        id: &str,
        batches: Vec<(CacheKind, CertCache)>,
    ) -> RepositoryResult<()> {
        let mut conn = self.conn.clone();
        self.ensure_exists(&mut conn, id).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (kind, entries) in &batches {
            self.queue_merge(&mut pipe, id, *kind, entries)?;
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn update_crl_cache_inner(
        &self,
        id: &str,
        crl_size: u64,
        caches: RevocationCache,
    ) -> RepositoryResult<()> {
        caches.check_exclusive()?;
        let mut conn = self.conn.clone();
        self.ensure_exists(&mut conn, id).await?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset(self.record_key(id), CRL_SIZE, crl_size).ignore();
        self.queue_caches(&mut pipe, id, &caches)?;
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn update_delta_inner(&self, id: &str, update: DeltaCrlUpdate) -> RepositoryResult<()> {
        let mut conn = self.conn.clone();
        let (fields, revoked, unrevoked, expired): (HashMap<String, String>, usize, usize, usize) =
            redis::pipe()
                .atomic()
                .hgetall(self.record_key(id))
                .hlen(self.cache_key(id, CacheKind::Revoked))
                .hlen(self.cache_key(id, CacheKind::Unrevoked))
                .hlen(self.cache_key(id, CacheKind::Expired))
                .query_async(&mut conn)
                .await?;
        if fields.is_empty() {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        let record = decode_record(id, &fields)?;
        check_delta_update(&record, revoked + unrevoked + expired, &update)?;

        let key = self.record_key(id);
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(
            &key,
            &[
                (DELTA_CRL_NUMBER, update.delta_crl_number.to_string()),
                (DELTA_CRL_SIZE, update.delta_crl_size.to_string()),
                (DELTA_CRL, STANDARD.encode(&update.delta_crl)),
            ],
        )
        .ignore();
        match update.next_update {
            Some(next) => pipe.hset(&key, NEXT_UPDATE, next.to_rfc3339()).ignore(),
            None => pipe.hdel(&key, NEXT_UPDATE).ignore(),
        };
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(id, delta_crl_number = %update.delta_crl_number, "Stored delta CRL");
        Ok(())
    }

    async fn first_unsaved_inner(&self, id: &str, first_unsaved: FirstUnsaved) -> RepositoryResult<()> {
        let mut conn = self.conn.clone();
        self.ensure_exists(&mut conn, id).await?;
        let _: () = conn
            .hset(self.record_key(id), FIRST_UNSAVED, first_unsaved.to_string())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CrlRepository for RedisCrlRepository {
    async fn add_issuing_point(&self, record: CrlIssuingPointRecord) -> RepositoryResult<()> {
        let id = record.id.clone();
        self.locked(&id, self.add_inner(record)).await
    }

    async fn read_issuing_point(&self, id: &str) -> RepositoryResult<CrlIssuingPointRecord> {
        self.load(id).await
    }

    async fn delete_issuing_point(&self, id: &str) -> RepositoryResult<()> {
        self.locked(id, self.delete_inner(id)).await
    }

    async fn modify_issuing_point(
        &self,
        id: &str,
        modifications: Vec<Modification>,
    ) -> RepositoryResult<()> {
        self.locked(id, self.modify_inner(id, modifications)).await
    }

    async fn update_crl(&self, id: &str, update: CrlUpdate) -> RepositoryResult<()> {
        self.locked(id, self.update_crl_inner(id, update)).await
    }

    async fn update_revoked_certs(
        &self,
        id: &str,
        revoked: CertCache,
        unrevoked: CertCache,
    ) -> RepositoryResult<()> {
        let batches = vec![
            (CacheKind::Revoked, revoked),
            (CacheKind::Unrevoked, unrevoked),
        ];
        self.locked(id, self.merge_inner(id, batches)).await
    }

    async fn update_expired_certs(&self, id: &str, expired: CertCache) -> RepositoryResult<()> {
        self.locked(id, self.merge_inner(id, vec![(CacheKind::Expired, expired)]))
            .await
    }

    async fn update_crl_cache(
        &self,
        id: &str,
        crl_size: u64,
        caches: RevocationCache,
    ) -> RepositoryResult<()> {
        self.locked(id, self.update_crl_cache_inner(id, crl_size, caches))
            .await
    }

    async fn update_delta_crl(&self, id: &str, update: DeltaCrlUpdate) -> RepositoryResult<()> {
        self.locked(id, self.update_delta_inner(id, update)).await
    }

    async fn update_first_unsaved(
        &self,
        id: &str,
        first_unsaved: FirstUnsaved,
    ) -> RepositoryResult<()> {
        self.locked(id, self.first_unsaved_inner(id, first_unsaved))
            .await
    }

    async fn issuing_point_names(&self) -> RepositoryResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut names: Vec<String> = conn.smembers(self.index_key()).await?;
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl DatabaseAdmin for RedisCrlRepository {
    async fn init(&self) -> RepositoryResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis store reachable");
        Ok(())
    }

    async fn init_database(&self) -> RepositoryResult<()> {
        let mut conn = self.conn.clone();
        let created: Option<String> = redis::cmd("SET")
            .arg(self.schema_key())
            .arg(SCHEMA_VERSION)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        if created.is_some() {
            info!(prefix = %self.prefix, version = SCHEMA_VERSION, "Initialized Redis store");
        } else {
            info!(prefix = %self.prefix, "Redis store already initialized");
        }
        Ok(())
    }

    async fn rebuild_indexes(&self) -> RepositoryResult<usize> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:ip:*", self.prefix);
        let mut ids = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            for key in keys {
                // Skip anything that is not a record hash.
                let id: Option<String> = conn.hget(&key, ID).await?;
                ids.extend(id);
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        let index = self.index_key();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.del(&index).ignore();
        if !ids.is_empty() {
            pipe.sadd(&index, &ids).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        info!(count = ids.len(), "Rebuilt issuing point index");
        Ok(ids.len())
    }
}

// The id always comes last, so ids containing ':' cannot reach another
// record's keys.
fn record_key(prefix: &str, id: &str) -> String {
    format!("{prefix}:ip:{id}")
}

fn cache_key(prefix: &str, kind: CacheKind, id: &str) -> String {
    format!("{prefix}:cache:{kind}:{id}")
}

/// Lease in milliseconds for `SET PX`, which rejects 0.
fn lease_millis(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn corrupt(id: &str, reason: impl Into<String>) -> RepositoryError {
    RepositoryError::Corrupt {
        id: id.to_string(),
        reason: reason.into(),
    }
}

fn encode_record(record: &CrlIssuingPointRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        (ID, record.id.clone()),
        (CRL_NUMBER, record.crl_number.to_string()),
        (CRL_SIZE, record.crl_size.to_string()),
        (DELTA_CRL_NUMBER, record.delta_crl_number.to_string()),
        (DELTA_CRL_SIZE, record.delta_crl_size.to_string()),
        (FIRST_UNSAVED, record.first_unsaved.to_string()),
    ];
    if let Some(t) = record.this_update {
        fields.push((THIS_UPDATE, t.to_rfc3339()));
    }
    if let Some(t) = record.next_update {
        fields.push((NEXT_UPDATE, t.to_rfc3339()));
    }
    for (name, bytes) in [
        (CRL, &record.crl),
        (DELTA_CRL, &record.delta_crl),
        (CA_CERT, &record.ca_cert),
    ] {
        if let Some(bytes) = bytes {
            fields.push((name, STANDARD.encode(bytes)));
        }
    }
    fields
}

fn absent_fields(record: &CrlIssuingPointRecord) -> Vec<&'static str> {
    [
        (THIS_UPDATE, record.this_update.is_none()),
        (NEXT_UPDATE, record.next_update.is_none()),
        (CRL, record.crl.is_none()),
        (DELTA_CRL, record.delta_crl.is_none()),
        (CA_CERT, record.ca_cert.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect()
}

fn required<T>(id: &str, fields: &HashMap<String, String>, name: &str) -> RepositoryResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = fields
        .get(name)
        .ok_or_else(|| corrupt(id, format!("missing field {name}")))?;
    raw.parse()
        .map_err(|e| corrupt(id, format!("field {name}: {e}")))
}

fn optional_time(
    id: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> RepositoryResult<Option<DateTime<Utc>>> {
    fields
        .get(name)
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(id, format!("field {name}: {e}")))
        })
        .transpose()
}

fn optional_bytes(
    id: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> RepositoryResult<Option<Vec<u8>>> {
    fields
        .get(name)
        .map(|raw| {
            STANDARD
                .decode(raw)
                .map_err(|e| corrupt(id, format!("field {name}: {e}")))
        })
        .transpose()
}

fn decode_record(
    id: &str,
    fields: &HashMap<String, String>,
) -> RepositoryResult<CrlIssuingPointRecord> {
    let stored_id: String = required(id, fields, ID)?;
    if stored_id != id {
        return Err(corrupt(id, format!("hash holds issuing point {stored_id}")));
    }

    Ok(CrlIssuingPointRecord {
        id: stored_id,
        crl_number: required(id, fields, CRL_NUMBER)?,
        crl_size: required(id, fields, CRL_SIZE)?,
        delta_crl_number: required(id, fields, DELTA_CRL_NUMBER)?,
        delta_crl_size: required(id, fields, DELTA_CRL_SIZE)?,
        this_update: optional_time(id, fields, THIS_UPDATE)?,
        next_update: optional_time(id, fields, NEXT_UPDATE)?,
        first_unsaved: required(id, fields, FIRST_UNSAVED)?,
        crl: optional_bytes(id, fields, CRL)?,
        delta_crl: optional_bytes(id, fields, DELTA_CRL)?,
        ca_cert: optional_bytes(id, fields, CA_CERT)?,
        caches: RevocationCache::new(),
    })
}

fn encode_cache(entries: &CertCache) -> RepositoryResult<Vec<(String, String)>> {
    entries
        .iter()
        .map(|(serial, entry)| Ok((serial.to_string(), serde_json::to_string(entry)?)))
        .collect()
}

fn decode_cache(raw: HashMap<String, String>) -> RepositoryResult<CertCache> {
    raw.values()
        .map(|value| {
            let entry: CacheEntry = serde_json::from_str(value)?;
            Ok((entry.serial.clone(), entry))
        })
        .collect()
}
