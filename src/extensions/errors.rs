use thiserror::Error;

/// Errors raised while building CRL extensions
#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("Issuing point {0} has no CA certificate")]
    MissingCaCert(String),

    #[error("Failed to parse CA certificate: {0}")]
    CertificateParse(String),

    #[error("Invalid extension setting {key}: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("DER encoding failed: {0}")]
    Encoding(#[from] der::Error),
}

impl ExtensionError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Convenient Result type alias
pub type ExtensionResult<T> = Result<T, ExtensionError>;
