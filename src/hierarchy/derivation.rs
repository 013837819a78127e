//! Key Derivation Service
//!
//! Turns the user secret into the User Master Key. The only persisted state
//! is a [`MasterKeyRecord`]: the salt, the KDF parameters that were actually
//! used and a verifier (a canary sealed under the UMK). A wrong secret is
//! detected by the verifier failing to open; the secret itself is never
//! stored.

use crate::crypto::{
    derive_key, derive_key_with_fallback, KdfParams, MasterKey, RandomSource, Salt, SecretKey,
};
use crate::error::{Error, Result};
use crate::hierarchy::wrap::{open_bytes, seal_bytes, WrapContext};
use crate::record::b64;
use crate::vault::{get_value, put_value, SecureKeyVault};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Vault id of the master key record
pub const MASTER_RECORD_ID: &str = "umk/record";

const VERIFIER_CANARY: &[u8] = b"journalcrypt-umk-verifier-v1";

/// Persisted, non-secret description of how to re-derive the UMK
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeyRecord {
    pub generation: u32,
    pub salt: Salt,
    pub kdf: KdfParams,
    #[serde(with = "b64")]
    pub verifier: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Old and new master keys for a secret change, plus the record to commit
/// once every DEK has been rewrapped
#[derive(Debug)]
pub struct SecretChange {
    pub old: MasterKey,
    pub new: MasterKey,
    pub record: MasterKeyRecord,
}

pub struct KeyDerivationService {
    vault: Arc<dyn SecureKeyVault>,
    rng: Arc<dyn RandomSource>,
    params: KdfParams,
    fallback: KdfParams,
}

impl KeyDerivationService {
    pub fn new(
        vault: Arc<dyn SecureKeyVault>,
        rng: Arc<dyn RandomSource>,
        params: KdfParams,
        fallback: KdfParams,
    ) -> Self {
        KeyDerivationService {
            vault,
            rng,
            params,
            fallback,
        }
    }

    /// Whether a master key record exists
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.vault.get(MASTER_RECORD_ID)?.is_some())
    }

    /// Load the persisted master key record
    pub fn record(&self) -> Result<MasterKeyRecord> {
        get_value(self.vault.as_ref(), MASTER_RECORD_ID)?.ok_or(Error::NotInitialized)
    }

    /// First secret entry: create salt and verifier and persist them
    pub fn initialize(&self, secret: &[u8]) -> Result<MasterKey> {
        if self.is_initialized()? {
            return Err(Error::AlreadyInitialized);
        }
        let (master, record) = self.derive_fresh(secret, 0)?;
        put_value(self.vault.as_ref(), MASTER_RECORD_ID, &record)?;
        self.vault.flush()?;
        info!("Master key initialized (salt {})", record.salt.to_hex());
        Ok(master)
    }

    /// Re-derive the UMK from the secret and check it against the verifier
    pub fn unlock(&self, secret: &[u8]) -> Result<MasterKey> {
        let record = self.record()?;
        let master = self.derive_from_record(secret, &record)?;
        debug!("Master key unlocked (generation {})", record.generation);
        Ok(master)
    }

    /// Derive and verify a master key against a specific record
    pub fn derive_from_record(&self, secret: &[u8], record: &MasterKeyRecord) -> Result<MasterKey> {
        let key = derive_key(secret, &record.salt, &record.kdf)?;
        let master = MasterKey::new(key, record.salt, record.generation);
        match Self::verify(&master, record) {
            Ok(()) => Ok(master),
            Err(_) => {
                warn!("Master key verification failed");
                Err(Error::AuthenticationFailed)
            }
        }
    }

    /// Prepare a secret change.
    ///
    /// Verifies `old_secret`, derives the new UMK under a fresh salt and
    /// builds the replacement record. Nothing is persisted here; the rotation
    /// service commits the record after all DEKs are rewrapped.
    pub fn change_secret(&self, old_secret: &[u8], new_secret: &[u8]) -> Result<SecretChange> {
        let old = self.unlock(old_secret)?;
        let (new, record) = self.derive_fresh(new_secret, old.generation() + 1)?;
        info!(
            "Prepared secret change: generation {} -> {}",
            old.generation(),
            new.generation()
        );
        Ok(SecretChange { old, new, record })
    }

    /// Replace the persisted salt and verifier
    pub fn commit(&self, record: &MasterKeyRecord) -> Result<()> {
        put_value(self.vault.as_ref(), MASTER_RECORD_ID, record)?;
        self.vault.flush()?;
        info!("Master key record committed (generation {})", record.generation);
        Ok(())
    }

    /// Derive a standalone key from a password with a fresh salt
    pub fn derive_ephemeral(&self, password: &[u8]) -> Result<(SecretKey, Salt, KdfParams)> {
        let salt = Salt::random(self.rng.as_ref())?;
        let (key, params) =
            derive_key_with_fallback(password, &salt, &self.params, &self.fallback)?;
        Ok((key, salt, params))
    }

    /// Derive a key with explicit salt and parameters
    pub fn derive_with(&self, password: &[u8], salt: &Salt, params: &KdfParams) -> Result<SecretKey> {
        derive_key(password, salt, params)
    }

    fn derive_fresh(&self, secret: &[u8], generation: u32) -> Result<(MasterKey, MasterKeyRecord)> {
        let salt = Salt::random(self.rng.as_ref())?;
        let (key, kdf) = derive_key_with_fallback(secret, &salt, &self.params, &self.fallback)?;
        let verifier = seal_bytes(
            &key,
            VERIFIER_CANARY,
            &WrapContext::verifier(generation),
            self.rng.as_ref(),
        )?;

        let record = MasterKeyRecord {
            generation,
            salt,
            kdf,
            verifier,
            created_at: Utc::now(),
        };
        Ok((MasterKey::new(key, salt, generation), record))
    }

    fn verify(master: &MasterKey, record: &MasterKeyRecord) -> Result<()> {
        let canary = open_bytes(
            master.key(),
            &record.verifier,
            &WrapContext::verifier(record.generation),
        )?;
        if canary.as_slice() != VERIFIER_CANARY {
            return Err(Error::AuthenticationFailed);
        }
        Ok(())
    }
}
