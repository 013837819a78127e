//! AES-256-GCM Encryption Implementation
//!
//! All payloads and wrapped keys go through AES-256-GCM which provides:
//! - Confidentiality: Data is encrypted
//! - Integrity: Any tampering is detected
//! - Authentication: Verifies the data came from the key holder
//!
//! The IV is supplied by the caller and must come from a CSPRNG for every
//! call; see [`crate::crypto::random_iv`].

use crate::crypto::{SecretKey, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use zeroize::Zeroize;

fn aead_key(key: &SecretKey) -> Result<LessSafeKey> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| Error::Encryption("Failed to create AES-256-GCM key".to_string()))?;
    Ok(LessSafeKey::new(unbound_key))
}

/// Encrypt `plaintext` under `key`, binding `aad` into the tag.
///
/// # Returns
/// Ciphertext (same length as plaintext) and the detached 128-bit tag
pub fn aead_encrypt(
    key: &SecretKey,
    iv: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
    let sealing_key = aead_key(key)?;
    let nonce = Nonce::assume_unique_for_key(*iv);

    let mut in_out = plaintext.to_vec();
    let tag = sealing_key
        .seal_in_place_separate_tag(nonce, Aad::from(aad), &mut in_out)
        .map_err(|_| Error::Encryption("Encryption failed".to_string()))?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_ref());
    Ok((in_out, tag_bytes))
}

/// Decrypt and verify.
///
/// Fails with `AuthenticationFailed` if the tag does not verify; the working
/// buffer is wiped and no partial plaintext is returned.
pub fn aead_decrypt(
    key: &SecretKey,
    iv: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let opening_key = aead_key(key)?;
    let nonce = Nonce::assume_unique_for_key(*iv);

    let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let opened = opening_key
        .open_in_place(nonce, Aad::from(aad), &mut in_out)
        .map(|plaintext| plaintext.len());

    match opened {
        Ok(len) => {
            in_out.truncate(len);
            Ok(in_out)
        }
        Err(_) => {
            in_out.zeroize();
            Err(Error::AuthenticationFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{random_iv, SystemRandom};

    fn test_key() -> SecretKey {
        SecretKey::generate(&SystemRandom).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = test_key();
        let iv = random_iv(&SystemRandom).unwrap();
        let plaintext = b"Felt calmer after the walk today";

        let (ciphertext, tag) = aead_encrypt(&key, &iv, plaintext, b"").unwrap();
        assert_eq!(ciphertext.len(), plaintext.len());
        let decrypted = aead_decrypt(&key, &iv, &ciphertext, &tag, b"").unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_aad_fails() {
        let key = test_key();
        let iv = random_iv(&SystemRandom).unwrap();

        let (ciphertext, tag) = aead_encrypt(&key, &iv, b"Secret data", b"item:1234").unwrap();
        let result = aead_decrypt(&key, &iv, &ciphertext, &tag, b"item:5678");

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_wrong_key_fails() {
        let iv = random_iv(&SystemRandom).unwrap();
        let (ciphertext, tag) = aead_encrypt(&test_key(), &iv, b"Secret data", b"").unwrap();
        let result = aead_decrypt(&test_key(), &iv, &ciphertext, &tag, b"");

        assert!(matches!(result, Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = test_key();
        let iv = random_iv(&SystemRandom).unwrap();

        let (ciphertext, mut tag) = aead_encrypt(&key, &iv, b"Secret data", b"").unwrap();
        tag[15] ^= 0x01;

        assert!(aead_decrypt(&key, &iv, &ciphertext, &tag, b"").is_err());
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key();
        let iv = random_iv(&SystemRandom).unwrap();

        let (ciphertext, tag) = aead_encrypt(&key, &iv, b"", b"meta").unwrap();
        let decrypted = aead_decrypt(&key, &iv, &ciphertext, &tag, b"meta").unwrap();

        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_large_plaintext() {
        let key = test_key();
        let iv = random_iv(&SystemRandom).unwrap();
        let plaintext = vec![0x42u8; 1024 * 1024]; // 1MB

        let (ciphertext, tag) = aead_encrypt(&key, &iv, &plaintext, b"").unwrap();
        let decrypted = aead_decrypt(&key, &iv, &ciphertext, &tag, b"").unwrap();

        assert_eq!(decrypted, plaintext);
    }
}
