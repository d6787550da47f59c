// (c) 2024 the OpenSPA developers

//! # Cryptographic envelope
//!
//! Every PDU body is signed by its sender and then encrypted for its recipient.
//! The algorithms are bundled into a _cipher suite_, named on the wire by a 6-bit id in the header.
//!
//! There is currently one suite, [`CipherSuiteId::RsaSha256Aes256Cbc`]:
//!
//! * Bulk encryption is AES-256-CBC with PKCS#7 padding, under a fresh random key and IV per PDU.
//! * The AES key is wrapped with RSA-PKCS1v15 under the recipient's 2048-bit public key.
//! * The envelope is `wrapped_key (256) ‖ iv (16) ‖ ciphertext`.
//! * Signatures are RSA-PKCS1v15 over SHA-256.
//!
//! Suites are used through the [`CipherSuite`] trait, so callers can register
//! their own implementations in a [`CipherSuites`] registry.

use std::{collections::HashMap, fmt::Display, sync::Arc};

use uuid::Uuid;

use crate::protocol::{Error, Result};

mod aes;
pub use aes::{pkcs7_pad, pkcs7_unpad};

mod keygen;
pub use keygen::{generate_client, generate_key_pair, write_key_pair, ClientBundle};

mod keys;
pub use keys::{
    check_pair, load_private_key, load_public_key, read_private_key, read_public_key,
    KeyDirectory, KeyError, KeyKind, KeyResolver, KeyRing, KEY_BITS,
};

mod rsa_suite;
pub use rsa_suite::RsaSuite;

/// Signature method byte carried in version 1 responses: RSA-PKCS1v15 over SHA-256
pub const SIGNATURE_METHOD_RSA_SHA256: u8 = 0x01;

/// The set of cipher suites this implementation knows about.
///
/// Values outside this set are rejected when a header is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[non_exhaustive]
pub enum CipherSuiteId {
    /// RSA-2048 key wrap + AES-256-CBC, signed with RSA-SHA256
    #[strum(serialize = "RSA_SHA256_AES256CBC")]
    RsaSha256Aes256Cbc,
}

impl CipherSuiteId {
    /// The signature method implied by this suite
    #[must_use]
    pub fn signature_method(self) -> u8 {
        match self {
            CipherSuiteId::RsaSha256Aes256Cbc => SIGNATURE_METHOD_RSA_SHA256,
        }
    }
}

impl From<CipherSuiteId> for u8 {
    fn from(value: CipherSuiteId) -> Self {
        match value {
            CipherSuiteId::RsaSha256Aes256Cbc => 0x01,
        }
    }
}

impl TryFrom<u8> for CipherSuiteId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(CipherSuiteId::RsaSha256Aes256Cbc),
            v => Err(Error::UnsupportedCipherSuite(v)),
        }
    }
}

/// Identifies whose key to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    /// The SPA server (there is only one from a client's point of view)
    Server,
    /// A client, by device id
    Client(Uuid),
}

impl Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Peer::Server => write!(f, "server"),
            Peer::Client(id) => write!(f, "client {id}"),
        }
    }
}

/// A named bundle of encryption and signature algorithms.
///
/// Implementations hold the local private key and know how to find peers' public keys.
pub trait CipherSuite: Send + Sync + std::fmt::Debug {
    /// Which suite this is
    fn id(&self) -> CipherSuiteId;

    /// Encrypts `plaintext` so only `recipient` can read it
    fn secure(&self, recipient: &Peer, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Reverses [`secure`](CipherSuite::secure), using our own private key
    fn unlock(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;

    /// Signs `data` with our own private key
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Checks `signature` over `data` against `signer`'s public key.
    ///
    /// A mismatch is `Ok(false)`; errors are reserved for missing keys and the like.
    fn verify(&self, signer: &Peer, data: &[u8], signature: &[u8]) -> Result<bool>;

    /// Length in bytes of the signatures this suite produces
    fn signature_len(&self) -> usize;
}

/// Lookup table from suite id to implementation, supplied by the caller to the decoders
#[derive(Debug, Clone, Default)]
pub struct CipherSuites {
    suites: HashMap<CipherSuiteId, Arc<dyn CipherSuite>>,
}

impl CipherSuites {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a suite
    pub fn insert(&mut self, suite: Arc<dyn CipherSuite>) {
        let _ = self.suites.insert(suite.id(), suite);
    }

    /// Builder-style [`insert`](CipherSuites::insert)
    #[must_use]
    pub fn with(mut self, suite: Arc<dyn CipherSuite>) -> Self {
        self.insert(suite);
        self
    }

    /// Finds the suite for an id
    pub fn get(&self, id: CipherSuiteId) -> Result<Arc<dyn CipherSuite>> {
        self.suites
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::UnsupportedCipherSuite(u8::from(id)))
    }
}


#[cfg(test)]
mod test {
    use super::{test_keys, CipherSuiteId, CipherSuites};
    use crate::protocol::Error;

    #[test]
    fn suite_ids() {
        assert_eq!(
            CipherSuiteId::try_from(1).unwrap(),
            CipherSuiteId::RsaSha256Aes256Cbc
        );
        assert_eq!(u8::from(CipherSuiteId::RsaSha256Aes256Cbc), 1);
        for bad in [0u8, 2, 63, 64] {
            assert_eq!(
                CipherSuiteId::try_from(bad).unwrap_err(),
                Error::UnsupportedCipherSuite(bad)
            );
        }
    }

    #[test]
    fn registry() {
        let empty = CipherSuites::new();
        assert_eq!(
            empty.get(CipherSuiteId::RsaSha256Aes256Cbc).unwrap_err(),
            Error::UnsupportedCipherSuite(1)
        );
        let reg = CipherSuites::new().with(test_keys::server_suite());
        let suite = reg.get(CipherSuiteId::RsaSha256Aes256Cbc).unwrap();
        assert_eq!(suite.id(), CipherSuiteId::RsaSha256Aes256Cbc);
        assert_eq!(suite.signature_len(), 256);
    }
}
