use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use x509_parser::num_bigint::BigUint;

/// Error returned when a big number cannot be parsed from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid number: {0:?}")]
pub struct ParseNumberError(pub String);

/// Parses a non-negative big integer in decimal, or in hex with a `0x` prefix.
fn parse_biguint(value: &str) -> Result<BigUint, ParseNumberError> {
    let trimmed = value.trim();
    let (digits, radix) = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(ParseNumberError(value.to_string()));
    }

    BigUint::parse_bytes(digits.as_bytes(), radix).ok_or_else(|| ParseNumberError(value.to_string()))
}

macro_rules! big_number {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(BigUint);

        impl $name {
            pub fn new(value: BigUint) -> Self {
                Self(value)
            }

            /// Builds the number from unsigned big-endian bytes.
            pub fn from_bytes_be(bytes: &[u8]) -> Self {
                Self(BigUint::from_bytes_be(bytes))
            }

            /// Unsigned big-endian bytes, at least one byte long.
            pub fn to_bytes_be(&self) -> Vec<u8> {
                self.0.to_bytes_be()
            }

            pub fn as_biguint(&self) -> &BigUint {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                format!("0x{:x}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(BigUint::from(value))
            }
        }

        impl From<BigUint> for $name {
            fn from(value: BigUint) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = ParseNumberError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_biguint(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                value.parse().map_err(de::Error::custom)
            }
        }
    };
}

big_number!(
    /// Certificate serial number, the key of every cache map.
    SerialNumber
);

big_number!(
    /// Sequence number of a full or delta CRL.
    CrlNumber
);

impl CrlNumber {
    /// The number following this one.
    pub fn next(&self) -> Self {
        Self(&self.0 + 1u32)
    }
}
