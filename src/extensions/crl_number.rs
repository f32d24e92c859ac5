use const_oid::db::rfc5280::ID_CE_CRL_NUMBER;
use der::asn1::Uint;
use x509_cert::ext::Extension;

use crate::crl::{CrlIssuingPointRecord, CrlNumber};
use crate::extensions::errors::ExtensionResult;
use crate::extensions::{CrlScope, encode_extension};

/// CRLNumber of the CRL being issued: the full CRL number, or the delta
/// number when a delta CRL is built.
pub fn generate(
    record: &CrlIssuingPointRecord,
    scope: CrlScope,
    critical: bool,
) -> ExtensionResult<Extension> {
    let number = match scope {
        CrlScope::Full => &record.crl_number,
        CrlScope::Delta => &record.delta_crl_number,
    };
    encode_extension(ID_CE_CRL_NUMBER, critical, &to_uint(number)?)
}

pub(crate) fn to_uint(number: &CrlNumber) -> ExtensionResult<Uint> {
    Ok(Uint::new(&number.to_bytes_be())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Decode;

    #[test]
    fn test_wraps_current_numbers() {
        let mut record = CrlIssuingPointRecord::new(
            "MasterCRL",
            "0x0100".parse().unwrap(),
            0,
            None,
            None,
        );
        record.delta_crl_number = CrlNumber::from(0x80);

        let full = generate(&record, CrlScope::Full, false).unwrap();
        assert_eq!(full.extn_id, ID_CE_CRL_NUMBER);
        assert_eq!(full.extn_value.as_bytes(), &[0x02, 0x02, 0x01, 0x00]);

        // high bit set needs a leading zero
        let delta = generate(&record, CrlScope::Delta, false).unwrap();
        assert_eq!(delta.extn_value.as_bytes(), &[0x02, 0x02, 0x00, 0x80]);
        assert_eq!(
            Uint::from_der(delta.extn_value.as_bytes()).unwrap().as_bytes(),
            &[0x80]
        );
    }

    #[test]
    fn test_large_number() {
        let number: CrlNumber = "340282366920938463463374607431768211456".parse().unwrap();
        let uint = to_uint(&number).unwrap();
        assert_eq!(uint.as_bytes().len(), 17);
    }
}
