use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crl::errors::{RepositoryError, RepositoryResult};
use crate::crl::reason::RevocationReason;
use crate::crl::serial::SerialNumber;

/// One certificate tracked by an issuing point between full CRLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub serial: SerialNumber,
    pub revoked_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RevocationReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidity_date: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(serial: SerialNumber, revoked_on: DateTime<Utc>) -> Self {
        Self {
            serial,
            revoked_on,
            reason: None,
            invalidity_date: None,
        }
    }

    pub fn with_reason(mut self, reason: RevocationReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn with_invalidity_date(mut self, date: DateTime<Utc>) -> Self {
        self.invalidity_date = Some(date);
        self
    }
}

/// Cache entries keyed by serial number.
pub type CertCache = BTreeMap<SerialNumber, CacheEntry>;

/// Collects entries into a [`CertCache`]; later entries win for repeated serials.
pub fn cert_cache(entries: impl IntoIterator<Item = CacheEntry>) -> CertCache {
    entries
        .into_iter()
        .map(|entry| (entry.serial.clone(), entry))
        .collect()
}

/// The three cache maps of an issuing point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Revoked,
    Unrevoked,
    Expired,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [CacheKind::Revoked, CacheKind::Unrevoked, CacheKind::Expired];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheKind::Revoked => "revoked",
            CacheKind::Unrevoked => "unrevoked",
            CacheKind::Expired => "expired",
        }
    }
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Revoked, released-from-hold and expired certificates accumulated since the
/// last full CRL.
///
/// A serial number lives in at most one of the three maps. Recording a serial
/// into one map removes it from the other two, so a certificate can move from
/// `revoked` to `unrevoked` when its hold is released.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RevocationCache {
    revoked: CertCache,
    unrevoked: CertCache,
    expired: CertCache,
}

impl RevocationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cache from three maps, rejecting serials present in more than one.
    pub fn from_maps(
        revoked: CertCache,
        unrevoked: CertCache,
        expired: CertCache,
    ) -> RepositoryResult<Self> {
        let cache = Self {
            revoked,
            unrevoked,
            expired,
        };
        cache.check_exclusive()?;
        Ok(cache)
    }

    pub fn revoked(&self) -> &CertCache {
        &self.revoked
    }

    pub fn unrevoked(&self) -> &CertCache {
        &self.unrevoked
    }

    pub fn expired(&self) -> &CertCache {
        &self.expired
    }

    pub fn get(&self, kind: CacheKind) -> &CertCache {
        match kind {
            CacheKind::Revoked => &self.revoked,
            CacheKind::Unrevoked => &self.unrevoked,
            CacheKind::Expired => &self.expired,
        }
    }

    fn get_mut(&mut self, kind: CacheKind) -> &mut CertCache {
        match kind {
            CacheKind::Revoked => &mut self.revoked,
            CacheKind::Unrevoked => &mut self.unrevoked,
            CacheKind::Expired => &mut self.expired,
        }
    }

    /// Which map currently holds `serial`, if any.
    pub fn kind_of(&self, serial: &SerialNumber) -> Option<CacheKind> {
        CacheKind::ALL
            .into_iter()
            .find(|kind| self.get(*kind).contains_key(serial))
    }

    /// Merges `entries` into the map of `kind`, overwriting earlier entries for
    /// the same serial and evicting the serial from the other maps.
    pub fn record(&mut self, kind: CacheKind, entries: &CertCache) {
        for (serial, entry) in entries {
            for other in CacheKind::ALL.into_iter().filter(|other| *other != kind) {
                self.get_mut(other).remove(serial);
            }
            self.get_mut(kind).insert(serial.clone(), entry.clone());
        }
    }

    pub fn record_revoked(&mut self, entries: &CertCache) {
        self.record(CacheKind::Revoked, entries);
    }

    pub fn record_unrevoked(&mut self, entries: &CertCache) {
        self.record(CacheKind::Unrevoked, entries);
    }

    pub fn record_expired(&mut self, entries: &CertCache) {
        self.record(CacheKind::Expired, entries);
    }

    /// Merges a batch of revocations and hold releases.
    ///
    /// Revocations are applied first, so a serial present in both inputs ends
    /// up released.
    pub fn merge_revocations(&mut self, revoked: &CertCache, unrevoked: &CertCache) {
        self.record_revoked(revoked);
        self.record_unrevoked(unrevoked);
    }

    /// Replaces the whole map of `kind`.
    pub fn replace(&mut self, kind: CacheKind, entries: CertCache) {
        *self.get_mut(kind) = entries;
    }

    pub fn check_exclusive(&self) -> RepositoryResult<()> {
        for serial in self.revoked.keys() {
            if self.unrevoked.contains_key(serial) || self.expired.contains_key(serial) {
                return Err(RepositoryError::CacheConflict(serial.clone()));
            }
        }
        for serial in self.unrevoked.keys() {
            if self.expired.contains_key(serial) {
                return Err(RepositoryError::CacheConflict(serial.clone()));
            }
        }
        Ok(())
    }

    /// Total number of entries over the three maps.
    pub fn len(&self) -> usize {
        self.revoked.len() + self.unrevoked.len() + self.expired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.revoked.clear();
        self.unrevoked.clear();
        self.expired.clear();
    }

    /// Entries whose serial is at or after `start`, map by map.
    ///
    /// `None` yields everything.
    pub fn entries_from(&self, start: Option<&SerialNumber>) -> Vec<(CacheKind, &CacheEntry)> {
        let mut pending = Vec::new();
        for kind in CacheKind::ALL {
            let map = self.get(kind);
            match start {
                Some(start) => pending.extend(map.range(start.clone()..).map(|(_, e)| (kind, e))),
                None => pending.extend(map.values().map(|e| (kind, e))),
            }
        }
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn entry(serial: u64, day: u32) -> CacheEntry {
        CacheEntry::new(
            SerialNumber::from(serial),
            Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_release_from_hold_moves_serial() {
        let mut cache = RevocationCache::new();
        cache.record_revoked(&cert_cache([
            entry(1, 1).with_reason(RevocationReason::CertificateHold)
        ]));
        assert_eq!(cache.kind_of(&SerialNumber::from(1)), Some(CacheKind::Revoked));

        cache.record_unrevoked(&cert_cache([entry(1, 2)]));
        assert_eq!(cache.kind_of(&SerialNumber::from(1)), Some(CacheKind::Unrevoked));
        assert!(cache.revoked().is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_serial_in_both_inputs_ends_unrevoked() {
        let mut cache = RevocationCache::new();
        cache.merge_revocations(&cert_cache([entry(7, 1)]), &cert_cache([entry(7, 2)]));
        assert!(cache.revoked().is_empty());
        assert_eq!(cache.unrevoked()[&SerialNumber::from(7)], entry(7, 2));
    }

    #[test]
    fn test_from_maps_rejects_overlap() {
        let result = RevocationCache::from_maps(
            cert_cache([entry(3, 1)]),
            CertCache::new(),
            cert_cache([entry(3, 2)]),
        );
        assert!(matches!(result, Err(RepositoryError::CacheConflict(s)) if s == SerialNumber::from(3)));
    }

    #[test]
    fn test_entries_from_cursor() {
        let mut cache = RevocationCache::new();
        cache.record_revoked(&cert_cache([entry(1, 1), entry(5, 1)]));
        cache.record_expired(&cert_cache([entry(3, 1), entry(9, 1)]));

        let all = cache.entries_from(None);
        assert_eq!(all.len(), 4);

        let start = SerialNumber::from(5);
        let pending: Vec<_> = cache
            .entries_from(Some(&start))
            .into_iter()
            .map(|(kind, e)| (kind, e.serial.to_string()))
            .collect();
        assert_eq!(
            pending,
            vec![
                (CacheKind::Revoked, "5".to_string()),
                (CacheKind::Expired, "9".to_string())
            ]
        );
    }

    #[derive(Debug, Clone)]
    enum Op {
        Revoke(u64, u32),
        Release(u64, u32),
        Expire(u64, u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        (0u8..3, 0u64..8, 1u32..28).prop_map(|(kind, serial, day)| match kind {
            0 => Op::Revoke(serial, day),
            1 => Op::Release(serial, day),
            _ => Op::Expire(serial, day),
        })
    }

    proptest! {
        #[test]
        fn last_write_wins_per_serial(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let mut cache = RevocationCache::new();
            let mut expected: BTreeMap<u64, (CacheKind, CacheEntry)> = BTreeMap::new();

            for op in &ops {
                let (kind, serial, day) = match *op {
                    Op::Revoke(s, d) => (CacheKind::Revoked, s, d),
                    Op::Release(s, d) => (CacheKind::Unrevoked, s, d),
                    Op::Expire(s, d) => (CacheKind::Expired, s, d),
                };
                let e = entry(serial, day);
                cache.record(kind, &cert_cache([e.clone()]));
                expected.insert(serial, (kind, e));
            }

            prop_assert!(cache.check_exclusive().is_ok());
            prop_assert_eq!(cache.len(), expected.len());
            for (serial, (kind, e)) in expected {
                let serial = SerialNumber::from(serial);
                prop_assert_eq!(cache.kind_of(&serial), Some(kind));
                prop_assert_eq!(&cache.get(kind)[&serial], &e);
            }
        }
    }
}
