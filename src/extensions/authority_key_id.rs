use const_oid::db::rfc5280::ID_CE_AUTHORITY_KEY_IDENTIFIER;
use der::{Decode, asn1::OctetString};
use x509_cert::{
    ext::{
        Extension,
        pkix::{AuthorityKeyIdentifier, name::GeneralName},
    },
    name::Name,
    serial_number::SerialNumber,
};
use x509_parser::prelude::{FromDer, ParsedExtension, X509Certificate};

use crate::crl::CrlIssuingPointRecord;
use crate::extensions::encode_extension;
use crate::extensions::errors::{ExtensionError, ExtensionResult};

/// Builds the AuthorityKeyIdentifier of CRLs issued by `record`.
///
/// The CA certificate's own SubjectKeyIdentifier is reused when present.
/// Otherwise the identifier names the CA certificate by its issuer and serial
/// number.
pub fn generate(record: &CrlIssuingPointRecord, critical: bool) -> ExtensionResult<Extension> {
    let ca_cert = record
        .ca_cert
        .as_deref()
        .ok_or_else(|| ExtensionError::MissingCaCert(record.id.clone()))?;
    let aki = from_ca_certificate(ca_cert)?;
    encode_extension(ID_CE_AUTHORITY_KEY_IDENTIFIER, critical, &aki)
}

fn from_ca_certificate(der_bytes: &[u8]) -> ExtensionResult<AuthorityKeyIdentifier> {
    let (_, cert) = X509Certificate::from_der(der_bytes)
        .map_err(|e| ExtensionError::CertificateParse(e.to_string()))?;

    let subject_key_id = cert
        .extensions()
        .iter()
        .find_map(|ext| match ext.parsed_extension() {
            ParsedExtension::SubjectKeyIdentifier(kid) => Some(kid.0),
            _ => None,
        });

    if let Some(key_id) = subject_key_id {
        return Ok(AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(key_id)?),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        });
    }

    let issuer = Name::from_der(cert.issuer().as_raw())?;
    Ok(AuthorityKeyIdentifier {
        key_identifier: None,
        authority_cert_issuer: Some(vec![GeneralName::DirectoryName(issuer)]),
        authority_cert_serial_number: Some(SerialNumber::new(cert.raw_serial())?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::CrlNumber;

    const CA_WITH_SKI: &[u8] = include_bytes!("../../test_data/ca_with_ski.der");
    const CA_WITHOUT_SKI: &[u8] = include_bytes!("../../test_data/ca_without_ski.der");

    fn record_with(ca_cert: &[u8]) -> CrlIssuingPointRecord {
        CrlIssuingPointRecord::new("MasterCRL", CrlNumber::from(1), 0, None, None)
            .with_ca_cert(ca_cert.to_vec())
    }

    fn decode(ext: &Extension) -> AuthorityKeyIdentifier {
        AuthorityKeyIdentifier::from_der(ext.extn_value.as_bytes()).unwrap()
    }

    #[test]
    fn test_uses_subject_key_identifier() {
        let ext = generate(&record_with(CA_WITH_SKI), false).unwrap();
        assert_eq!(ext.extn_id, ID_CE_AUTHORITY_KEY_IDENTIFIER);
        assert!(!ext.critical);

        let aki = decode(&ext);
        assert_eq!(
            hex::encode_upper(aki.key_identifier.unwrap().as_bytes()),
            "16EF55327454F6D428A7F49139993DAC657FE60D"
        );
        assert!(aki.authority_cert_issuer.is_none());
    }

    #[test]
    fn test_falls_back_to_issuer_and_serial() {
        let aki = decode(&generate(&record_with(CA_WITHOUT_SKI), true).unwrap());
        assert!(aki.key_identifier.is_none());
        assert_eq!(aki.authority_cert_serial_number.unwrap().as_bytes(), &[0x20, 0x02]);

        let issuer = aki.authority_cert_issuer.unwrap();
        match &issuer[0] {
            GeneralName::DirectoryName(name) => {
                assert!(name.to_string().contains("CN=Legacy Test CA"))
            }
            other => panic!("unexpected issuer name {other:?}"),
        }
    }

    #[test]
    fn test_requires_ca_certificate() {
        let record = CrlIssuingPointRecord::new("MasterCRL", CrlNumber::from(1), 0, None, None);
        assert!(matches!(
            generate(&record, false),
            Err(ExtensionError::MissingCaCert(id)) if id == "MasterCRL"
        ));
        assert!(matches!(
            generate(&record_with(&[0x30, 0x03, 0x01]), false),
            Err(ExtensionError::CertificateParse(_))
        ));
    }
}
