use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::crl::cache::{CertCache, RevocationCache};
use crate::crl::serial::{CrlNumber, ParseNumberError, SerialNumber};

const CLEAN_CACHE: &str = "-1";
const NEW_CACHE: &str = "-2";

/// Resumption marker for an interrupted incremental CRL build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum FirstUnsaved {
    /// No generation in progress, the cache has been fully accounted for.
    Clean,
    /// The issuing point was just created and has never produced a CRL.
    #[default]
    New,
    /// Generation stopped before persisting the entry with this serial.
    Cursor(SerialNumber),
}

impl FirstUnsaved {
    /// Serial to resume from; `None` means start at the beginning of the cache.
    pub fn resume_from(&self) -> Option<&SerialNumber> {
        match self {
            FirstUnsaved::Cursor(serial) => Some(serial),
            FirstUnsaved::Clean | FirstUnsaved::New => None,
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, FirstUnsaved::Clean)
    }
}

impl fmt::Display for FirstUnsaved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirstUnsaved::Clean => f.write_str(CLEAN_CACHE),
            FirstUnsaved::New => f.write_str(NEW_CACHE),
            FirstUnsaved::Cursor(serial) => write!(f, "{serial}"),
        }
    }
}

impl FromStr for FirstUnsaved {
    type Err = ParseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            CLEAN_CACHE => Ok(FirstUnsaved::Clean),
            NEW_CACHE => Ok(FirstUnsaved::New),
            other => other.parse().map(FirstUnsaved::Cursor),
        }
    }
}

impl Serialize for FirstUnsaved {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FirstUnsaved {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(de::Error::custom)
    }
}

/// Persistent state of one CRL issuing point.
///
/// Instances handed out by a repository are detached copies: changing a field
/// has no effect until it is written back through one of the repository's
/// update operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrlIssuingPointRecord {
    pub id: String,
    pub crl_number: CrlNumber,
    pub crl_size: u64,
    pub delta_crl_number: CrlNumber,
    pub delta_crl_size: u64,
    pub this_update: Option<DateTime<Utc>>,
    pub next_update: Option<DateTime<Utc>>,
    pub first_unsaved: FirstUnsaved,
    #[serde(skip)]
    pub crl: Option<Vec<u8>>,
    #[serde(skip)]
    pub delta_crl: Option<Vec<u8>>,
    #[serde(skip)]
    pub ca_cert: Option<Vec<u8>>,
    pub caches: RevocationCache,
}

impl CrlIssuingPointRecord {
    pub fn new(
        id: impl Into<String>,
        crl_number: CrlNumber,
        crl_size: u64,
        this_update: Option<DateTime<Utc>>,
        next_update: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            crl_number,
            crl_size,
            delta_crl_number: CrlNumber::default(),
            delta_crl_size: 0,
            this_update,
            next_update,
            first_unsaved: FirstUnsaved::New,
            crl: None,
            delta_crl: None,
            ca_cert: None,
            caches: RevocationCache::new(),
        }
    }

    pub fn with_ca_cert(mut self, ca_cert: Vec<u8>) -> Self {
        self.ca_cert = Some(ca_cert);
        self
    }

    pub fn with_caches(mut self, caches: RevocationCache) -> Self {
        self.caches = caches;
        self
    }

    pub fn revoked_certs(&self) -> &CertCache {
        self.caches.revoked()
    }

    pub fn unrevoked_certs(&self) -> &CertCache {
        self.caches.unrevoked()
    }

    pub fn expired_certs(&self) -> &CertCache {
        self.caches.expired()
    }
}
