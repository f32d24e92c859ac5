use const_oid::db::rfc5280::ID_CE_CRL_REASONS;
use tracing::debug;
use x509_cert::ext::Extension;
use x509_cert::ext::pkix::crl::CrlReason;

use crate::crl::RevocationReason;
use crate::extensions::config::ExtensionConfig;
use crate::extensions::encode_extension;
use crate::extensions::errors::ExtensionResult;

const REASON: &str = "reason";

/// Reason configured under `reason`. Absent, `none` and unknown names all
/// mean no reason.
pub fn configured_reason(config: &ExtensionConfig) -> Option<RevocationReason> {
    let value = config.get(REASON)?;
    if value.eq_ignore_ascii_case("none") {
        return None;
    }
    value
        .parse::<RevocationReason>()
        .inspect_err(|e| debug!(error = %e, "Ignoring revocation reason"))
        .ok()
}

pub fn generate(config: &ExtensionConfig, critical: bool) -> ExtensionResult<Option<Extension>> {
    configured_reason(config)
        .map(|reason| for_reason(reason, critical))
        .transpose()
}

/// Encodes `reason` as a CRL entry reasonCode.
pub fn for_reason(reason: RevocationReason, critical: bool) -> ExtensionResult<Extension> {
    encode_extension(ID_CE_CRL_REASONS, critical, &CrlReason::from(reason))
}
