// AES-256-CBC with PKCS#7 padding
// (c) 2024 the OpenSPA developers

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::protocol::{Error, Result};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size
pub(super) const BLOCK_SIZE: usize = 16;
/// AES-256 key size
pub(super) const KEY_SIZE: usize = 32;

/// Pads to a whole number of blocks per RFC 5652: append `p` copies of `p`, where `p` is in 1..=16.
#[must_use]
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    #[allow(clippy::cast_possible_truncation)] // pad is at most 16
    out.resize(data.len() + pad, pad as u8);
    out
}

/// Strips PKCS#7 padding, checking every padding byte
pub fn pkcs7_unpad(data: &[u8]) -> Result<&[u8]> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Crypto(format!(
            "padded length {} is not a positive multiple of {BLOCK_SIZE}",
            data.len()
        )));
    }
    let pad = data[data.len() - 1];
    let pad_len = usize::from(pad);
    if pad_len == 0 || pad_len > BLOCK_SIZE {
        return Err(Error::Crypto(format!("invalid padding byte {pad:#04x}")));
    }
    let (body, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|b| *b != pad) {
        return Err(Error::Crypto("inconsistent padding".into()));
    }
    Ok(body)
}

pub(super) fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(cipher.encrypt_padded_vec_mut::<NoPadding>(&pkcs7_pad(plaintext)))
}

pub(super) fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::Crypto(format!(
            "ciphertext length {} is not a positive multiple of {BLOCK_SIZE}",
            ciphertext.len()
        )));
    }
    let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|e| Error::Crypto(e.to_string()))?;
    let padded = cipher
        .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(pkcs7_unpad(&padded)?.to_vec())
}

#[cfg(test)]
mod test {
    use super::{decrypt, encrypt, pkcs7_pad, pkcs7_unpad, BLOCK_SIZE, KEY_SIZE};

    #[test]
    fn padding_all_lengths() {
        for len in 0..=32 {
            let data: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();
            let padded = pkcs7_pad(&data);
            assert_eq!(padded.len() % BLOCK_SIZE, 0);
            let pad = *padded.last().unwrap();
            assert!((1..=16).contains(&pad), "pad byte {pad} for length {len}");
            assert_eq!(padded.len(), len + usize::from(pad));
            assert_eq!(pkcs7_unpad(&padded).unwrap(), &data[..]);
        }
    }

    #[test]
    fn full_block_of_padding() {
        let padded = pkcs7_pad(&[0u8; 16]);
        assert_eq!(padded.len(), 32);
        assert_eq!(&padded[16..], &[16u8; 16]);
    }

    #[test]
    fn unpad_rejects() {
        assert!(pkcs7_unpad(&[]).is_err());
        assert!(pkcs7_unpad(&[1u8; 15]).is_err());
        let mut zero = [0u8; 16];
        assert!(pkcs7_unpad(&zero).is_err());
        zero[15] = 17;
        assert!(pkcs7_unpad(&zero).is_err());
        let mut inconsistent = [3u8; 16];
        inconsistent[14] = 2;
        assert!(pkcs7_unpad(&inconsistent).is_err());
    }

    #[test]
    fn cbc_round_trip() {
        let key: Vec<u8> = (0..KEY_SIZE).map(|_| fastrand::u8(..)).collect();
        let iv: Vec<u8> = (0..BLOCK_SIZE).map(|_| fastrand::u8(..)).collect();
        for len in [0, 1, 15, 16, 17, 100] {
            let data: Vec<u8> = (0..len).map(|_| fastrand::u8(..)).collect();
            let ct = encrypt(&key, &iv, &data).unwrap();
            assert_eq!(ct.len() % BLOCK_SIZE, 0);
            assert!(ct.len() > data.len());
            assert_eq!(decrypt(&key, &iv, &ct).unwrap(), data);
        }
    }

    #[test]
    fn cbc_bad_inputs() {
        let key = [7u8; KEY_SIZE];
        let iv = [9u8; BLOCK_SIZE];
        assert!(encrypt(&key[..16], &iv, b"x").is_err());
        assert!(decrypt(&key, &iv, &[]).is_err());
        assert!(decrypt(&key, &iv, &[0u8; 15]).is_err());
        let ct = encrypt(&key, &iv, b"hello").unwrap();
        // Wrong key: almost certainly garbage padding
        let other = [8u8; KEY_SIZE];
        let wrong = decrypt(&other, &iv, &ct);
        if let Ok(pt) = wrong {
            assert_ne!(pt, b"hello");
        }
    }
}
