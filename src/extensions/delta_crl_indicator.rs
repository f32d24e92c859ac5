use const_oid::db::rfc5280::ID_CE_DELTA_CRL_INDICATOR;
use x509_cert::ext::Extension;

use crate::crl::CrlIssuingPointRecord;
use crate::extensions::crl_number::to_uint;
use crate::extensions::encode_extension;
use crate::extensions::errors::ExtensionResult;

/// Names the full CRL a delta CRL builds on. RFC 5280 requires it critical,
/// so `critical` is normally true.
pub fn generate(record: &CrlIssuingPointRecord, critical: bool) -> ExtensionResult<Extension> {
    encode_extension(
        ID_CE_DELTA_CRL_INDICATOR,
        critical,
        &to_uint(&record.crl_number)?,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crl::CrlNumber;

    #[test]
    fn test_points_at_base_crl() {
        let mut record =
            CrlIssuingPointRecord::new("MasterCRL", CrlNumber::from(7), 0, None, None);
        record.delta_crl_number = CrlNumber::from(9);

        let ext = generate(&record, true).unwrap();
        assert_eq!(ext.extn_id, ID_CE_DELTA_CRL_INDICATOR);
        assert!(ext.critical);
        assert_eq!(ext.extn_value.as_bytes(), &[0x02, 0x01, 0x07]);
    }
}
