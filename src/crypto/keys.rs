// RSA key loading and lookup
// (c) 2024 the OpenSPA developers

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use rsa::{
    pkcs1::{DecodeRsaPrivateKey as _, DecodeRsaPublicKey as _},
    pkcs8::{DecodePrivateKey as _, DecodePublicKey as _},
    traits::PublicKeyParts as _,
    RsaPrivateKey, RsaPublicKey,
};
use thiserror::Error;
use tracing::trace;

use super::Peer;

/// The only modulus size the wire format supports (the wrapped key is exactly 256 bytes)
pub const KEY_BITS: usize = 2048;

/// Which half of a key pair an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum KeyKind {
    /// Public key
    Public,
    /// Private key
    Private,
}

/// Key loading and lookup failures
#[derive(Debug, Error)]
pub enum KeyError {
    /// The key file could not be read
    #[error("failed to read {kind} key {}: {source}", path.display())]
    Read {
        /// Public or private
        kind: KeyKind,
        /// The file we tried
        path: PathBuf,
        /// Underlying cause
        source: std::io::Error,
    },
    /// The key data was not a PEM key we understand
    #[error("failed to decode {kind} key: {reason}")]
    Decode {
        /// Public or private
        kind: KeyKind,
        /// What the decoder said
        reason: String,
    },
    /// No key is known for this peer
    #[error("no public key known for {0}")]
    Missing(Peer),
    /// The key is not 2048 bits
    #[error("unsupported RSA key size {0} bits (need 2048)")]
    UnsupportedSize(usize),
    /// The private and public keys do not belong together
    #[error("public key does not match private key")]
    Mismatch,
}

pub(super) fn check_size(bits: usize) -> Result<(), KeyError> {
    if bits == KEY_BITS {
        Ok(())
    } else {
        Err(KeyError::UnsupportedSize(bits))
    }
}

/// Parses a PEM private key, PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`)
pub fn load_private_key(pem: &str) -> Result<RsaPrivateKey, KeyError> {
    let key = RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|e8| {
            RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e1| KeyError::Decode {
                kind: KeyKind::Private,
                reason: format!("not PKCS#8 ({e8}) nor PKCS#1 ({e1})"),
            })
        })?;
    check_size(key.size() * 8)?;
    Ok(key)
}

/// Parses a PEM public key, SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`)
pub fn load_public_key(pem: &str) -> Result<RsaPublicKey, KeyError> {
    let key = RsaPublicKey::from_public_key_pem(pem).or_else(|e8| {
        RsaPublicKey::from_pkcs1_pem(pem).map_err(|e1| KeyError::Decode {
            kind: KeyKind::Public,
            reason: format!("not SPKI ({e8}) nor PKCS#1 ({e1})"),
        })
    })?;
    check_size(key.size() * 8)?;
    Ok(key)
}

fn read_pem(path: &Path, kind: KeyKind) -> Result<String, KeyError> {
    trace!("reading {kind} key from {}", path.display());
    std::fs::read_to_string(path).map_err(|source| KeyError::Read {
        kind,
        path: path.to_path_buf(),
        source,
    })
}

/// Reads and parses a private key file
pub fn read_private_key(path: &Path) -> Result<RsaPrivateKey, KeyError> {
    load_private_key(&read_pem(path, KeyKind::Private)?)
}

/// Reads and parses a public key file
pub fn read_public_key(path: &Path) -> Result<RsaPublicKey, KeyError> {
    load_public_key(&read_pem(path, KeyKind::Public)?)
}

/// Checks that `public` is the public half of `private`
pub fn check_pair(private: &RsaPrivateKey, public: &RsaPublicKey) -> Result<(), KeyError> {
    if private.to_public_key() == *public {
        Ok(())
    } else {
        Err(KeyError::Mismatch)
    }
}

/// Finds the public key belonging to a peer
pub trait KeyResolver: Send + Sync + std::fmt::Debug {
    /// Looks up the key
    fn public_key(&self, peer: &Peer) -> Result<RsaPublicKey, KeyError>;
}

/// Keys held in memory
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: HashMap<Peer, RsaPublicKey>,
}

impl KeyRing {
    /// Creates an empty ring
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key (builder style)
    #[must_use]
    pub fn with(mut self, peer: Peer, key: RsaPublicKey) -> Self {
        let _ = self.keys.insert(peer, key);
        self
    }
}

impl KeyResolver for KeyRing {
    fn public_key(&self, peer: &Peer) -> Result<RsaPublicKey, KeyError> {
        self.keys.get(peer).cloned().ok_or(KeyError::Missing(*peer))
    }
}

/// Client public keys stored one per file as `<dir>/<device uuid>.pem`.
///
/// Files are read on every lookup, so keys can be added or revoked without a restart.
/// Lookups do blocking file I/O; async callers run them under `spawn_blocking`.
#[derive(Debug, Clone)]
pub struct KeyDirectory {
    dir: PathBuf,
}

impl KeyDirectory {
    /// Constructor
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }
}

impl KeyResolver for KeyDirectory {
    fn public_key(&self, peer: &Peer) -> Result<RsaPublicKey, KeyError> {
        let Peer::Client(id) = peer else {
            return Err(KeyError::Missing(*peer));
        };
        let path = self.dir.join(format!("{}.pem", id.hyphenated()));
        if !path.exists() {
            return Err(KeyError::Missing(*peer));
        }
        read_public_key(&path)
    }
}
