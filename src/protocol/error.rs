//! Codec error kinds
// (c) 2024 the OpenSPA developers

use thiserror::Error;

/// Everything that can go wrong while encoding or decoding a PDU.
///
/// These surface to the caller verbatim; the server logs them and drops the datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A buffer was too short or too long for what it was meant to hold
    #[error("invalid bytes: {0}")]
    InvalidBytes(String),
    /// An expected field (or container entry) was absent
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// A field was present but held a semantically illegal value
    #[error("invalid {field}: {reason}")]
    InvalidField {
        /// Which field
        field: &'static str,
        /// What was wrong with it
        reason: String,
    },
    /// The header carried a protocol version we do not speak
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    /// The header carried a cipher suite we do not support (or have no instance of)
    #[error("unsupported cipher suite {0:#04x}")]
    UnsupportedCipherSuite(u8),
    /// The response carried a signature method we do not support
    #[error("unsupported signature method {0:#04x}")]
    UnsupportedSignatureMethod(u8),
    /// The signature did not verify
    #[error("signature invalid")]
    SignatureInvalid,
    /// Key missing, malformed padding, or an error from the RSA/AES layer
    #[error("crypto failure: {0}")]
    Crypto(String),
    /// The encoded PDU would not fit in a single datagram
    #[error("PDU too large ({0} bytes)")]
    PduTooLarge(usize),
}

impl Error {
    pub(crate) fn invalid_field<S: Into<String>>(field: &'static str, reason: S) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn too_short(what: &str, wanted: usize, got: usize) -> Self {
        Self::InvalidBytes(format!("{what}: need {wanted} bytes, got {got}"))
    }
}

/// Result type for the codec
pub type Result<T, E = Error> = std::result::Result<T, E>;
