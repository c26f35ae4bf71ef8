//! Error types for the licensing engine.
//!
//! "This license is bad" is not an error: validation reports it through
//! [`crate::ValidationStatus`]. These variants describe failures to decode,
//! sign, or read a license, plus configuration problems.

use thiserror::Error;

/// Licensing-specific errors.
#[derive(Debug, Error)]
pub enum LicenseError {
    /// Compact key does not have the expected shape or prefix.
    #[error("invalid license key format: {0}")]
    InvalidKeyFormat(String),

    /// Compact key checksum does not match its payload.
    #[error("license key checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    /// Compact key payload could not be decompressed.
    #[error("license key payload could not be decompressed: {0}")]
    Decompression(String),

    /// Content is not valid license text.
    #[error("license content is not valid text: {0}")]
    InvalidText(String),

    /// Content parsed but does not describe a well-formed license.
    #[error("license content is corrupted: {0}")]
    Corrupted(String),

    /// The license was written by a format version this engine does not read.
    #[error("unsupported license format version: {0}")]
    UnsupportedVersion(String),

    /// ECDSA signature verification failed.
    #[error("license signature invalid")]
    InvalidSignature,

    /// No public key is registered under the license's key id.
    #[error("unknown signing key id: {0}")]
    UnknownKeyId(String),

    /// Key material could not be decoded.
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    /// Document fails issuance rules and cannot be signed.
    #[error("invalid license document: {0}")]
    InvalidDocument(String),

    /// Engine configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LicenseError {
    /// Returns true for decode failures that validation reports as `Corrupted`.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyFormat(_)
                | Self::ChecksumMismatch { .. }
                | Self::Decompression(_)
                | Self::InvalidText(_)
                | Self::Corrupted(_)
                | Self::Serialization(_)
        )
    }
}

/// Result type for license operations.
pub type LicenseResult<T> = Result<T, LicenseError>;
