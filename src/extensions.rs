//! CRL and CRL entry extension generators.
//!
//! Each generator is a stateless function of its configuration entry and the
//! issuing point record. Configuration lives under `extensions.<Name>` with
//! an `enable` flag, a `critical` flag and generator-specific keys.

pub mod authority_key_id;
pub mod config;
pub mod crl_number;
pub mod crl_reason;
pub mod delta_crl_indicator;
pub mod errors;
pub mod freshest_crl;
pub mod hold_instruction;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use const_oid::{
    ObjectIdentifier,
    db::rfc5280::{
        ID_CE_AUTHORITY_KEY_IDENTIFIER, ID_CE_CRL_NUMBER, ID_CE_CRL_REASONS,
        ID_CE_DELTA_CRL_INDICATOR, ID_CE_FRESHEST_CRL, ID_CE_HOLD_INSTRUCTION_CODE,
        ID_CE_INVALIDITY_DATE,
    },
};
use der::{
    Encode,
    asn1::{GeneralizedTime, OctetString},
};
use tracing::{debug, warn};
use x509_cert::ext::Extension;

use crate::crl::{CacheEntry, CrlIssuingPointRecord, RevocationReason};

pub use config::ExtensionConfig;
pub use errors::{ExtensionError, ExtensionResult};

/// Extension settings keyed by extension name.
pub type ExtensionsConfig = BTreeMap<String, ExtensionConfig>;

/// Which kind of CRL the extensions are built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrlScope {
    Full,
    Delta,
}

/// The configurable extensions, in the order they are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrlExtensionKind {
    AuthorityKeyIdentifier,
    CrlNumber,
    DeltaCrlIndicator,
    FreshestCrl,
    CrlReason,
    HoldInstruction,
}

impl CrlExtensionKind {
    pub const ALL: [CrlExtensionKind; 6] = [
        CrlExtensionKind::AuthorityKeyIdentifier,
        CrlExtensionKind::CrlNumber,
        CrlExtensionKind::DeltaCrlIndicator,
        CrlExtensionKind::FreshestCrl,
        CrlExtensionKind::CrlReason,
        CrlExtensionKind::HoldInstruction,
    ];

    /// Name used as the configuration key.
    pub fn name(self) -> &'static str {
        match self {
            CrlExtensionKind::AuthorityKeyIdentifier => "AuthorityKeyIdentifier",
            CrlExtensionKind::CrlNumber => "CRLNumber",
            CrlExtensionKind::DeltaCrlIndicator => "DeltaCRLIndicator",
            CrlExtensionKind::FreshestCrl => "FreshestCRL",
            CrlExtensionKind::CrlReason => "CRLReason",
            CrlExtensionKind::HoldInstruction => "HoldInstruction",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            CrlExtensionKind::AuthorityKeyIdentifier => ID_CE_AUTHORITY_KEY_IDENTIFIER,
            CrlExtensionKind::CrlNumber => ID_CE_CRL_NUMBER,
            CrlExtensionKind::DeltaCrlIndicator => ID_CE_DELTA_CRL_INDICATOR,
            CrlExtensionKind::FreshestCrl => ID_CE_FRESHEST_CRL,
            CrlExtensionKind::CrlReason => ID_CE_CRL_REASONS,
            CrlExtensionKind::HoldInstruction => ID_CE_HOLD_INSTRUCTION_CODE,
        }
    }

    /// Whether the extension belongs on the CRL itself for `scope`.
    /// Reason and hold instruction are entry extensions and never do.
    pub fn applies_to(self, scope: CrlScope) -> bool {
        match self {
            CrlExtensionKind::AuthorityKeyIdentifier | CrlExtensionKind::CrlNumber => true,
            CrlExtensionKind::DeltaCrlIndicator => scope == CrlScope::Delta,
            CrlExtensionKind::FreshestCrl => scope == CrlScope::Full,
            CrlExtensionKind::CrlReason | CrlExtensionKind::HoldInstruction => false,
        }
    }

    pub fn generate(
        self,
        config: &ExtensionConfig,
        record: &CrlIssuingPointRecord,
        scope: CrlScope,
        critical: bool,
    ) -> ExtensionResult<Option<Extension>> {
        match self {
            CrlExtensionKind::AuthorityKeyIdentifier => {
                authority_key_id::generate(record, critical).map(Some)
            }
            CrlExtensionKind::CrlNumber => crl_number::generate(record, scope, critical).map(Some),
            CrlExtensionKind::DeltaCrlIndicator => {
                delta_crl_indicator::generate(record, critical).map(Some)
            }
            CrlExtensionKind::FreshestCrl => freshest_crl::generate(config, critical),
            CrlExtensionKind::CrlReason => crl_reason::generate(config, critical),
            CrlExtensionKind::HoldInstruction => hold_instruction::generate(config, critical),
        }
    }
}

impl fmt::Display for CrlExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub(crate) fn encode_extension<T: Encode>(
    extn_id: ObjectIdentifier,
    critical: bool,
    value: &T,
) -> ExtensionResult<Extension> {
    Ok(Extension {
        extn_id,
        critical,
        extn_value: OctetString::new(value.to_der()?)?,
    })
}

/// Returns `extension` with its criticality set to `critical`.
pub fn set_critical(mut extension: Extension, critical: bool) -> Extension {
    extension.critical = critical;
    extension
}

fn enabled_config(
    configs: &ExtensionsConfig,
    kind: CrlExtensionKind,
) -> ExtensionResult<Option<&ExtensionConfig>> {
    let config = configs
        .iter()
        .find(|(name, _)| CrlExtensionKind::from_name(name) == Some(kind))
        .map(|(_, config)| config);
    match config {
        Some(config) if config.enabled()? => Ok(Some(config)),
        _ => Ok(None),
    }
}

/// Builds every enabled CRL-level extension for a CRL of `scope`.
pub fn build_crl_extensions(
    configs: &ExtensionsConfig,
    record: &CrlIssuingPointRecord,
    scope: CrlScope,
) -> ExtensionResult<Vec<Extension>> {
    for name in configs.keys() {
        if CrlExtensionKind::from_name(name).is_none() {
            warn!(name, "Ignoring unknown CRL extension");
        }
    }

    let mut extensions = Vec::new();
    for kind in CrlExtensionKind::ALL.into_iter().filter(|k| k.applies_to(scope)) {
        let Some(config) = enabled_config(configs, kind)? else {
            continue;
        };
        match kind.generate(config, record, scope, config.critical()?)? {
            Some(extension) => extensions.push(extension),
            None => debug!(id = %record.id, extension = %kind, "Extension has nothing to encode"),
        }
    }
    Ok(extensions)
}

/// Builds the extensions of one CRL entry.
///
/// The reason code is emitted when `CRLReason` is enabled and the entry has a
/// reason other than `unspecified`. Held entries also get the configured hold
/// instruction. An invalidity date is always carried over.
pub fn entry_extensions(
    configs: &ExtensionsConfig,
    entry: &CacheEntry,
) -> ExtensionResult<Vec<Extension>> {
    let mut extensions = Vec::new();

    if let Some(reason) = entry.reason
        && reason != RevocationReason::Unspecified
        && let Some(config) = enabled_config(configs, CrlExtensionKind::CrlReason)?
    {
        extensions.push(crl_reason::for_reason(reason, config.critical()?)?);
    }

    if entry.reason == Some(RevocationReason::CertificateHold)
        && let Some(config) = enabled_config(configs, CrlExtensionKind::HoldInstruction)?
        && let Some(instruction) = hold_instruction::configured_instruction(config)
    {
        extensions.push(hold_instruction::for_instruction(
            instruction,
            config.critical()?,
        )?);
    }

    if let Some(date) = entry.invalidity_date {
        extensions.push(invalidity_date(date)?);
    }
    Ok(extensions)
}

fn invalidity_date(date: DateTime<Utc>) -> ExtensionResult<Extension> {
    let secs = u64::try_from(date.timestamp())
        .map_err(|_| der::Error::from(der::ErrorKind::DateTime))?;
    let time = GeneralizedTime::from_unix_duration(Duration::from_secs(secs))?;
    encode_extension(ID_CE_INVALIDITY_DATE, false, &time)
}
