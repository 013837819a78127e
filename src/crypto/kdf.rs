//! Password-based key derivation
//!
//! Argon2id is the primary KDF. When Argon2id cannot run with the requested
//! parameters the caller may fall back to PBKDF2-HMAC-SHA256; the parameters
//! that were actually used are returned so they can be persisted and the
//! same key re-derived later.

use crate::crypto::{
    Salt, SecretKey, KEY_SIZE, MAX_ARGON2_ITERATIONS, MAX_ARGON2_MEMORY_KIB,
    MAX_ARGON2_PARALLELISM, MAX_PBKDF2_ITERATIONS, MIN_PBKDF2_ITERATIONS,
};
use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use ring::pbkdf2;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Key derivation function and its cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdfParams {
    Argon2id {
        /// Memory cost in KiB
        memory_kib: u32,
        /// Time cost (iterations)
        iterations: u32,
        /// Degree of parallelism
        parallelism: u32,
    },
    Pbkdf2Sha256 {
        iterations: u32,
    },
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfParams::Argon2id {
            memory_kib: 65536, // 64 MiB
            iterations: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Default PBKDF2 fallback parameters
    pub fn pbkdf2_default() -> Self {
        KdfParams::Pbkdf2Sha256 {
            iterations: 600_000,
        }
    }

    pub fn is_argon2(&self) -> bool {
        matches!(self, KdfParams::Argon2id { .. })
    }

    /// Reject parameter sets below the accepted floor or above the ceiling
    pub fn validate(&self) -> Result<()> {
        match *self {
            KdfParams::Argon2id {
                memory_kib,
                iterations,
                parallelism,
            } => {
                if memory_kib == 0 || iterations == 0 || parallelism == 0 {
                    return Err(Error::KeyDerivationFailed(
                        "Argon2id costs must be non-zero".to_string(),
                    ));
                }
                if memory_kib > MAX_ARGON2_MEMORY_KIB
                    || iterations > MAX_ARGON2_ITERATIONS
                    || parallelism > MAX_ARGON2_PARALLELISM
                {
                    return Err(Error::KeyDerivationFailed(format!(
                        "Argon2id costs exceed the limit (m={} KiB, t={}, p={})",
                        memory_kib, iterations, parallelism
                    )));
                }
            }
            KdfParams::Pbkdf2Sha256 { iterations } => {
                if iterations < MIN_PBKDF2_ITERATIONS {
                    return Err(Error::KeyDerivationFailed(format!(
                        "PBKDF2 requires at least {} iterations, got {}",
                        MIN_PBKDF2_ITERATIONS, iterations
                    )));
                }
                if iterations > MAX_PBKDF2_ITERATIONS {
                    return Err(Error::KeyDerivationFailed(format!(
                        "PBKDF2 iterations {} exceed the limit of {}",
                        iterations, MAX_PBKDF2_ITERATIONS
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Derive a 256-bit key from a secret and salt.
///
/// Deterministic: identical (secret, salt, params) always yield identical
/// key bytes.
pub fn derive_key(secret: &[u8], salt: &Salt, params: &KdfParams) -> Result<SecretKey> {
    params.validate()?;
    let mut output = Zeroizing::new([0u8; KEY_SIZE]);

    match *params {
        KdfParams::Argon2id {
            memory_kib,
            iterations,
            parallelism,
        } => {
            let argon_params = Params::new(memory_kib, iterations, parallelism, Some(KEY_SIZE))
                .map_err(|e| {
                    Error::KeyDerivationFailed(format!("Invalid Argon2id parameters: {}", e))
                })?;
            Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
                .hash_password_into(secret, salt.as_bytes(), &mut output[..])
                .map_err(|e| Error::KeyDerivationFailed(format!("Argon2id failed: {}", e)))?;
        }
        KdfParams::Pbkdf2Sha256 { iterations } => {
            let iterations = NonZeroU32::new(iterations).ok_or_else(|| {
                Error::KeyDerivationFailed("PBKDF2 iterations must be non-zero".to_string())
            })?;
            pbkdf2::derive(
                pbkdf2::PBKDF2_HMAC_SHA256,
                iterations,
                salt.as_bytes(),
                secret,
                &mut output[..],
            );
        }
    }

    Ok(SecretKey::from_zeroizing(output))
}

/// Derive with `preferred`, retrying with `fallback` if Argon2id is rejected.
///
/// Returns the key together with the parameters that produced it.
pub fn derive_key_with_fallback(
    secret: &[u8],
    salt: &Salt,
    preferred: &KdfParams,
    fallback: &KdfParams,
) -> Result<(SecretKey, KdfParams)> {
    match derive_key(secret, salt, preferred) {
        Ok(key) => Ok((key, *preferred)),
        Err(e) if preferred.is_argon2() && !fallback.is_argon2() => {
            warn!("Argon2id unavailable ({}), falling back to PBKDF2-HMAC-SHA256", e);
            let key = derive_key(secret, salt, fallback)?;
            debug!("Derived key with fallback KDF");
            Ok((key, *fallback))
        }
        Err(e) => Err(e),
    }
}
