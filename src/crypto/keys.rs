//! Key material containers
//!
//! - `SecretKey`: 256-bit symmetric key (DEK, MEK, EEK), zeroed on drop
//! - `MasterKey`: the User Master Key plus the salt and generation it belongs to
//! - `Salt`: 128-bit random KDF salt

use crate::crypto::{RandomSource, KEY_SIZE, SALT_SIZE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, Zeroizing};

/// 256-bit symmetric key held in a zeroizing buffer
#[derive(Clone)]
pub struct SecretKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl SecretKey {
    /// Generate a fresh random key
    pub fn generate(rng: &dyn RandomSource) -> Result<Self> {
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        rng.fill(&mut key[..])?;
        Ok(SecretKey { key })
    }

    /// Take ownership of raw bytes, wiping the caller's copy
    pub fn from_bytes(mut bytes: [u8; KEY_SIZE]) -> Self {
        let key = Zeroizing::new(bytes);
        bytes.zeroize();
        SecretKey { key }
    }

    /// Copy key bytes out of a slice of exactly `KEY_SIZE` bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(Error::InvalidKeyLength {
                expected: KEY_SIZE,
                got: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(SecretKey { key })
    }

    pub(crate) fn from_zeroizing(key: Zeroizing<[u8; KEY_SIZE]>) -> Self {
        SecretKey { key }
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// Random salt for password-based key derivation
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random(rng: &dyn RandomSource) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        rng.fill(&mut salt)?;
        Ok(Salt(salt))
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Salt(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let salt: [u8; SALT_SIZE] = bytes
            .try_into()
            .map_err(|_| Error::InvalidRecord(format!("Invalid salt length: {}", bytes.len())))?;
        Ok(Salt(salt))
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Salt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Salt({})", self.to_hex())
    }
}

/// User Master Key: top of the key hierarchy, derived from the user secret.
///
/// Only ever exists in memory. Dropping it zeroes the key bytes.
pub struct MasterKey {
    key: SecretKey,
    salt: Salt,
    generation: u32,
}

impl MasterKey {
    pub fn new(key: SecretKey, salt: Salt, generation: u32) -> Self {
        MasterKey {
            key,
            salt,
            generation,
        }
    }

    /// Get the key material
    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    /// Get the salt this key was derived with
    pub fn salt(&self) -> &Salt {
        &self.salt
    }

    /// Number of secret changes this hierarchy has gone through
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKey")
            .field("salt", &self.salt)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
