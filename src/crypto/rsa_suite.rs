// RSA-2048 + AES-256-CBC cipher suite
// (c) 2024 the OpenSPA developers

use std::sync::Arc;

use rand::{rngs::OsRng, RngCore as _};
use rsa::{traits::PublicKeyParts as _, Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest as _, Sha256};

use super::{
    aes::{self, BLOCK_SIZE, KEY_SIZE},
    keys::{check_size, KeyError, KeyResolver},
    CipherSuite, CipherSuiteId, Peer,
};
use crate::protocol::{Error, Result};

fn crypto<E: std::fmt::Display>(e: E) -> Error {
    Error::Crypto(e.to_string())
}

/// Cipher suite `0x01`: the local RSA-2048 private key plus a way of finding peers' public keys
pub struct RsaSuite {
    private: RsaPrivateKey,
    resolver: Arc<dyn KeyResolver>,
}

impl std::fmt::Debug for RsaSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.debug_struct("RsaSuite")
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl RsaSuite {
    /// Constructor. The private key must be 2048 bits.
    pub fn new(
        private: RsaPrivateKey,
        resolver: Arc<dyn KeyResolver>,
    ) -> std::result::Result<Self, KeyError> {
        check_size(private.size() * 8)?;
        Ok(Self { private, resolver })
    }

    fn peer_key(&self, peer: &Peer) -> Result<rsa::RsaPublicKey> {
        self.resolver.public_key(peer).map_err(crypto)
    }
}

impl CipherSuite for RsaSuite {
    fn id(&self) -> CipherSuiteId {
        CipherSuiteId::RsaSha256Aes256Cbc
    }

    fn secure(&self, recipient: &Peer, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(Error::Crypto("refusing to encrypt empty plaintext".into()));
        }
        let public = self.peer_key(recipient)?;

        let mut key = [0u8; KEY_SIZE];
        let mut iv = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);

        let wrapped = public
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &key)
            .map_err(crypto)?;
        let ciphertext = aes::encrypt(&key, &iv, plaintext)?;

        let mut out = Vec::with_capacity(wrapped.len() + iv.len() + ciphertext.len());
        out.extend_from_slice(&wrapped);
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn unlock(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let wrapped_len = self.private.size();
        if ciphertext.len() <= wrapped_len + BLOCK_SIZE {
            return Err(Error::Crypto(format!(
                "envelope too short ({} bytes)",
                ciphertext.len()
            )));
        }
        let (wrapped, rest) = ciphertext.split_at(wrapped_len);
        let (iv, body) = rest.split_at(BLOCK_SIZE);

        let key = self
            .private
            .decrypt(Pkcs1v15Encrypt, wrapped)
            .map_err(crypto)?;
        if key.len() != KEY_SIZE {
            return Err(Error::Crypto(format!(
                "unwrapped key is {} bytes, expected {KEY_SIZE}",
                key.len()
            )));
        }
        aes::decrypt(&key, iv, body)
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(Error::Crypto("refusing to sign empty data".into()));
        }
        let digest = Sha256::digest(data);
        self.private
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(crypto)
    }

    fn verify(&self, signer: &Peer, data: &[u8], signature: &[u8]) -> Result<bool> {
        let public = self.peer_key(signer)?;
        let digest = Sha256::digest(data);
        Ok(public
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .is_ok())
    }

    fn signature_len(&self) -> usize {
        self.private.size()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        crypto::{test_keys, CipherSuite as _, Peer},
        protocol::Error,
    };

    #[test]
    fn secure_unlock_round_trip() {
        let client = test_keys::client_suite();
        let server = test_keys::server_suite();
        for len in [1usize, 15, 16, 17, 68 + 256, 1000] {
            let data: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();
            let envelope = client.secure(&Peer::Server, &data).unwrap();
            assert_eq!((envelope.len() - 256 - 16) % 16, 0);
            assert_eq!(server.unlock(&envelope).unwrap(), data);
            // The client cannot open what it sent to the server
            assert!(client.unlock(&envelope).is_err());
        }
        let envelope = server.secure(&Peer::Client(test_keys::device()), b"hi").unwrap();
        assert_eq!(client.unlock(&envelope).unwrap(), b"hi");
    }

    #[test]
    fn sign_verify() {
        let client = test_keys::client_suite();
        let server = test_keys::server_suite();
        let me = Peer::Client(test_keys::device());
        let sig = client.sign(b"open sesame").unwrap();
        assert_eq!(sig.len(), client.signature_len());
        assert!(server.verify(&me, b"open sesame", &sig).unwrap());
        assert!(!server.verify(&me, b"open sesame!", &sig).unwrap());
        let mut bad = sig.clone();
        bad[10] ^= 0x40;
        assert!(!server.verify(&me, b"open sesame", &bad).unwrap());
        assert!(!server.verify(&me, b"open sesame", &sig[1..]).unwrap());
    }

    #[test]
    fn unknown_signer() {
        let server = test_keys::server_suite();
        let stranger = Peer::Client(uuid::Uuid::new_v4());
        assert!(matches!(
            server.verify(&stranger, b"x", &[0; 256]),
            Err(Error::Crypto(_))
        ));
        assert!(matches!(
            server.secure(&stranger, b"x"),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn rejects_empty_and_short() {
        let client = test_keys::client_suite();
        let server = test_keys::server_suite();
        assert!(matches!(client.sign(&[]), Err(Error::Crypto(_))));
        assert!(matches!(
            client.secure(&Peer::Server, &[]),
            Err(Error::Crypto(_))
        ));
        assert!(matches!(server.unlock(&[0; 256]), Err(Error::Crypto(_))));
        assert!(matches!(
            server.unlock(&[0; 256 + 16]),
            Err(Error::Crypto(_))
        ));

        // Truncating the AES body breaks block alignment
        let envelope = client.secure(&Peer::Server, b"data").unwrap();
        assert!(matches!(
            server.unlock(&envelope[..envelope.len() - 1]),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn debug_hides_key() {
        let s = format!("{:?}", test_keys::client_suite());
        assert!(s.starts_with("RsaSuite"));
        assert!(!s.contains("private"), "{s}");
    }
}
