use std::str::FromStr;

use const_oid::{ObjectIdentifier, db::rfc5280::ID_CE_HOLD_INSTRUCTION_CODE};
use tracing::debug;
use x509_cert::ext::Extension;

use crate::extensions::config::ExtensionConfig;
use crate::extensions::encode_extension;
use crate::extensions::errors::ExtensionResult;

const INSTRUCTION: &str = "instruction";

/// Hold instruction codes of RFC 5280 section 5.3.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldInstruction {
    None,
    CallIssuer,
    Reject,
}

impl HoldInstruction {
    pub const NONE_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10040.2.1");
    pub const CALL_ISSUER_OID: ObjectIdentifier =
        ObjectIdentifier::new_unwrap("1.2.840.10040.2.2");
    pub const REJECT_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10040.2.3");

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            HoldInstruction::None => Self::NONE_OID,
            HoldInstruction::CallIssuer => Self::CALL_ISSUER_OID,
            HoldInstruction::Reject => Self::REJECT_OID,
        }
    }
}

impl FromStr for HoldInstruction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(HoldInstruction::None),
            "callissuer" => Ok(HoldInstruction::CallIssuer),
            "reject" => Ok(HoldInstruction::Reject),
            other => Err(format!("unknown hold instruction {other}")),
        }
    }
}

/// Instruction configured under `instruction`; unknown values are ignored.
pub fn configured_instruction(config: &ExtensionConfig) -> Option<HoldInstruction> {
    config
        .get(INSTRUCTION)?
        .parse::<HoldInstruction>()
        .inspect_err(|e| debug!(error = %e, "Ignoring hold instruction"))
        .ok()
}

pub fn generate(config: &ExtensionConfig, critical: bool) -> ExtensionResult<Option<Extension>> {
    configured_instruction(config)
        .map(|instruction| for_instruction(instruction, critical))
        .transpose()
}

pub fn for_instruction(instruction: HoldInstruction, critical: bool) -> ExtensionResult<Extension> {
    encode_extension(ID_CE_HOLD_INSTRUCTION_CODE, critical, &instruction.oid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::Decode;

    #[test]
    fn test_instruction_names() {
        for (name, oid) in [
            ("none", HoldInstruction::NONE_OID),
            ("CallIssuer", HoldInstruction::CALL_ISSUER_OID),
            ("reject", HoldInstruction::REJECT_OID),
        ] {
            let config = ExtensionConfig::new().with("instruction", name);
            let ext = generate(&config, false).unwrap().unwrap();
            assert_eq!(ext.extn_id, ID_CE_HOLD_INSTRUCTION_CODE);
            assert_eq!(
                ObjectIdentifier::from_der(ext.extn_value.as_bytes()).unwrap(),
                oid
            );
        }
    }

    #[test]
    fn test_absent_or_unknown_instruction() {
        assert!(generate(&ExtensionConfig::new(), false).unwrap().is_none());
        let config = ExtensionConfig::new().with("instruction", "callme");
        assert!(generate(&config, false).unwrap().is_none());
    }
}
