// (c) 2024 the OpenSPA developers
//! # Anti-DoS knocking (ADK)
//!
//! Client and server can share a short secret. The client then stamps each version 2
//! request header with a time-based one-time password (RFC 6238: HMAC-SHA1, 60 second
//! steps, 9 digits) derived from it. The server checks the proof before any public-key
//! work, so a flood of junk datagrams costs it one HMAC each rather than an RSA decryption.
//!
//! The secret is 4 random bytes, written as 7 characters of unpadded base32.
//! The proof is not a substitute for the signature: anyone who sees a request learns the
//! proof for the rest of its time step.

use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac as _};
use rand::RngCore as _;
use sha1::Sha1;
use subtle::ConstantTimeEq as _;

type HmacSha1 = Hmac<Sha1>;

/// Secret length in bytes
pub const SECRET_LEN: usize = 4;
/// Secret length once base32 encoded
pub const ENCODED_SECRET_LEN: usize = 7;
/// TOTP time step, seconds
pub const PERIOD: i64 = 60;
/// Decimal digits in a proof
pub const DIGITS: u32 = 9;

/// A secret that could not be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AdkError {
    /// Not base32, or the wrong length
    #[error("ADK secret must be {ENCODED_SECRET_LEN} base32 characters")]
    BadSecret,
}

/// Generates a fresh secret, base32 encoded
#[must_use]
pub fn generate_secret() -> String {
    let mut secret = [0u8; SECRET_LEN];
    rand::rngs::OsRng.fill_bytes(&mut secret);
    BASE32_NOPAD.encode(&secret)
}

/// HOTP (RFC 4226) with dynamic truncation to `digits` decimal digits
fn hotp(mac: &HmacSha1, counter: u64, digits: u32) -> u32 {
    let mut mac = mac.clone();
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = usize::from(digest[digest.len() - 1] & 0x0F);
    let code = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]) & 0x7FFF_FFFF;
    code % 10u32.pow(digits)
}

/// Proof generator and checker for one shared secret
#[derive(Clone)]
pub struct Adk {
    mac: HmacSha1,
}

impl std::fmt::Debug for Adk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Adk { .. }")
    }
}

impl Adk {
    /// Prepares the secret (case-insensitive base32, as produced by [`generate_secret`])
    pub fn new(secret: &str) -> Result<Self, AdkError> {
        let secret = secret.trim().to_ascii_uppercase();
        if secret.len() != ENCODED_SECRET_LEN {
            return Err(AdkError::BadSecret);
        }
        let key = BASE32_NOPAD
            .decode(secret.as_bytes())
            .map_err(|_| AdkError::BadSecret)?;
        let mac = HmacSha1::new_from_slice(&key).map_err(|_| AdkError::BadSecret)?;
        Ok(Self { mac })
    }

    fn step(unix_time: i64) -> u64 {
        u64::try_from(unix_time.div_euclid(PERIOD)).unwrap_or(0)
    }

    /// The proof for the time step containing `unix_time`
    #[must_use]
    pub fn proof_at(&self, unix_time: i64) -> u32 {
        hotp(&self.mac, Self::step(unix_time), DIGITS)
    }

    /// The proof for right now
    #[must_use]
    pub fn proof_now(&self) -> u32 {
        self.proof_at(chrono::Utc::now().timestamp())
    }

    /// Whether `proof` is valid at `unix_time`.
    ///
    /// Proofs from the adjacent time steps are accepted too, to allow for clock skew and
    /// for requests sent just before a step boundary. 0 means "no proof" and never matches.
    #[must_use]
    pub fn verify_at(&self, proof: u32, unix_time: i64) -> bool {
        if proof == 0 {
            return false;
        }
        let step = Self::step(unix_time);
        let mut ok = false;
        for candidate in [step.saturating_sub(1), step, step.saturating_add(1)] {
            ok |= bool::from(proof.ct_eq(&hotp(&self.mac, candidate, DIGITS)));
        }
        ok
    }
}
