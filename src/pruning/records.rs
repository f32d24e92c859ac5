use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crl::SerialNumber;

/// Identifier allocation strategy of a record repository.
///
/// Only `Random` ids are safe to delete in bulk; the legacy strategies derive
/// new ids from the highest one allocated so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdGenerator {
    #[default]
    Random,
    Legacy,
    Legacy2,
}

impl IdGenerator {
    pub fn as_str(self) -> &'static str {
        match self {
            IdGenerator::Random => "random",
            IdGenerator::Legacy => "legacy",
            IdGenerator::Legacy2 => "legacy2",
        }
    }
}

impl fmt::Display for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdGenerator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(IdGenerator::Random),
            "legacy" => Ok(IdGenerator::Legacy),
            "legacy2" => Ok(IdGenerator::Legacy2),
            other => Err(format!("unknown id generator {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertificateStatus {
    Valid,
    Revoked,
    Expired,
    RevokedExpired,
}

/// An issued certificate as seen by the pruning job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub serial: SerialNumber,
    pub status: CertificateStatus,
    pub not_after: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Request that produced the certificate, if known.
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Begin,
    Pending,
    Approved,
    SvcPending,
    Canceled,
    Rejected,
    Complete,
}

impl RequestStatus {
    pub fn is_complete(self) -> bool {
        matches!(self, RequestStatus::Complete)
    }
}

/// A certificate request as seen by the pruning job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub status: RequestStatus,
    pub modified_at: DateTime<Utc>,
}
